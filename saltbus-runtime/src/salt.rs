//! 运行时装配（Salt）
//!
//! 把核心组件按配置装配为一个可运行实例：
//! - Schema 注册表（缺省进程内实现，可注入）、处理器注册表、分发器、生产者；
//! - 进程内代理作为传输层，`TaskExecutor` 执行广播作业；
//! - `start` 挂载分发器、按处理器注册表建立队列绑定并启动工作循环，返回 `WorkerHandle`；
//! - 进程级缺省实例只在这一层提供（`install_global` / `global`），核心组件从不引用它。
//!
use crate::broker::{BrokerConfig, InMemoryBroker};
use crate::client::SaltClient;
use crate::config::SaltConfig;
use crate::error::{RuntimeError, RuntimeResult};
use crate::executor::TaskExecutor;
use saltbus_core::binder::{Declaration, EventHandle, RpcHandle};
use saltbus_core::dispatch::{
    Dispatcher, DispatcherConfig, Handler, HandlerContext, HandlerError, RetryPolicy,
};
use saltbus_core::hub::{DeclareOptions, SubscribeOptions};
use saltbus_core::producer::{Producer, ProducerConfig};
use saltbus_core::registry::{
    ExecutionMode, HandlerRegistration, HandlerRegistry, InMemorySchemaRegistry, SchemaRegistry,
};
use saltbus_core::schema::{Payload, Schema};
use saltbus_core::transport::Transport;
use saltbus_core::{EventHub, SaltResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::task::JoinHandle;

static GLOBAL: OnceLock<Arc<Salt>> = OnceLock::new();

pub struct Salt {
    config: SaltConfig,
    hub: EventHub,
    broker: Arc<InMemoryBroker>,
    executor: Arc<TaskExecutor>,
    dispatcher: Arc<Dispatcher>,
    started: AtomicBool,
}

impl Salt {
    pub fn new(config: SaltConfig) -> RuntimeResult<Self> {
        Self::with_registry(config, Arc::new(InMemorySchemaRegistry::new()))
    }

    pub fn with_registry(config: SaltConfig, registry: Arc<dyn SchemaRegistry>) -> RuntimeResult<Self> {
        config.validate()?;

        let broker = Arc::new(InMemoryBroker::new(
            BrokerConfig::builder()
                .concurrency(config.worker_concurrency)
                .queue_capacity(config.queue_capacity)
                .max_redeliveries(config.max_redeliveries)
                .build(),
        ));
        let handlers = Arc::new(HandlerRegistry::new());
        let executor = Arc::new(TaskExecutor::new());
        let dispatcher = Arc::new(
            Dispatcher::builder()
                .handlers(handlers.clone())
                .executor(executor.clone())
                .config(DispatcherConfig::builder().name(config.dispatcher_name.clone()).build())
                .build(),
        );
        let producer = Arc::new(
            Producer::builder()
                .transport(broker.clone())
                .config(ProducerConfig::builder().default_timeout(config.rpc_timeout()).build())
                .build(),
        );
        let hub = EventHub::new(registry, handlers, producer).with_default_retry(RetryPolicy::new(
            config.broadcast_max_retries,
            config.broadcast_retry_backoff(),
        ));

        Ok(Self {
            config,
            hub,
            broker,
            executor,
            dispatcher,
            started: AtomicBool::new(false),
        })
    }

    /// 设置进程级缺省实例；只能设置一次
    pub fn install_global(self) -> RuntimeResult<Arc<Salt>> {
        let salt = Arc::new(self);
        GLOBAL
            .set(salt.clone())
            .map_err(|_| RuntimeError::AlreadyInitialized)?;
        Ok(salt)
    }

    pub fn global() -> Option<Arc<Salt>> {
        GLOBAL.get().cloned()
    }

    pub fn config(&self) -> &SaltConfig {
        &self.config
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    pub fn registry(&self) -> &Arc<dyn SchemaRegistry> {
        self.hub.binder().registry()
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        self.hub.handlers()
    }

    pub fn broker(&self) -> &Arc<InMemoryBroker> {
        &self.broker
    }

    pub fn executor(&self) -> &Arc<TaskExecutor> {
        &self.executor
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn client(&self) -> SaltClient {
        SaltClient::new(self.hub.producer().clone(), self.hub.binder().clone())
    }

    pub async fn declare<T: Payload + Serialize>(
        &self,
        topic: &str,
        opts: DeclareOptions,
    ) -> SaltResult<EventHandle<T>> {
        self.hub.declare(topic, opts).await
    }

    pub async fn declare_rpc<T: Payload + Serialize>(
        &self,
        topic: &str,
        opts: DeclareOptions,
    ) -> SaltResult<RpcHandle<T>> {
        self.hub.declare_rpc(topic, opts).await
    }

    pub async fn declare_schema(
        &self,
        topic: &str,
        mode: ExecutionMode,
        schema: Schema,
        opts: DeclareOptions,
    ) -> SaltResult<Arc<Declaration>> {
        self.hub.declare_schema(topic, mode, schema, opts).await
    }

    pub fn declare_response<R: Payload>(&self, topic: &str) -> SaltResult<()> {
        self.hub.declare_response::<R>(topic)
    }

    pub fn declare_error<E: Payload>(&self, topic: &str) -> SaltResult<()> {
        self.hub.declare_error::<E>(topic)
    }

    pub async fn subscribe(
        &self,
        pattern: &str,
        opts: SubscribeOptions,
        handler: Arc<dyn Handler>,
    ) -> SaltResult<Arc<HandlerRegistration>> {
        self.hub.subscribe(pattern, opts, handler).await
    }

    pub async fn subscribe_typed<T, R, F, Fut>(
        &self,
        pattern: &str,
        name: &str,
        opts: SubscribeOptions,
        f: F,
    ) -> SaltResult<Arc<HandlerRegistration>>
    where
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(HandlerContext, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
    {
        self.hub.subscribe_typed(pattern, name, opts, f).await
    }

    /// 重试声明期因注册表不可达而暂存的注册
    pub async fn flush_pending(&self) -> SaltResult<usize> {
        self.hub.binder().flush_pending().await
    }

    /// 按已注册的处理器建立队列绑定；`exclude` 中的模式（如 `rpc.#`）覆盖的路由键不绑定
    pub async fn bind_queue(&self, exclude: &[&str]) -> RuntimeResult<Vec<String>> {
        let keys = self.handlers().subscribed_routing_keys(exclude)?;
        self.broker.declare_bindings(&keys).await?;
        tracing::info!(
            exchange = %self.config.exchange_name,
            queue = %self.config.queue_name,
            routing_keys = keys.len(),
            "queue bound"
        );
        Ok(keys)
    }

    /// 启动工作者；应在所有订阅注册完成后调用
    pub async fn start(&self) -> RuntimeResult<WorkerHandle> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(RuntimeError::AlreadyStarted);
        }
        self.broker.attach(self.dispatcher.clone())?;
        self.bind_queue(&[]).await?;
        let task = self.broker.start()?;
        tracing::info!(
            dispatcher = %self.config.dispatcher_name,
            handlers = self.handlers().count(None),
            "worker started"
        );
        Ok(WorkerHandle {
            broker: self.broker.clone(),
            executor: self.executor.clone(),
            task,
        })
    }
}

/// 工作者运行句柄：用于优雅关闭与等待任务结束
pub struct WorkerHandle {
    broker: Arc<InMemoryBroker>,
    executor: Arc<TaskExecutor>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn shutdown(&self) {
        self.broker.shutdown();
    }

    /// 等待工作循环退出与已提交的广播作业结束
    pub async fn join(self) {
        let _ = self.task.await;
        self.executor.wait().await;
    }
}
