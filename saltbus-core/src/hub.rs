//! 声明与订阅入口（EventHub）
//!
//! 组合 Schema 绑定、处理器注册表与生产者，对外提供：
//! - `declare` / `declare_rpc`：声明主题，返回可发布/可调用的句柄；
//! - `declare_response` / `declare_error`：声明 RPC 主题的响应/错误 Schema；
//! - `subscribe` / `subscribe_typed`：订阅主题模式，注册带校验的处理器。
//!
//! 所有依赖以实例注入，本类型不引用任何进程级全局状态。
//!
use crate::binder::{Declaration, EventHandle, RpcHandle, SchemaBinder, TypedHandler, ValidatingHandler};
use crate::dispatch::{Handler, HandlerContext, HandlerError, RetryPolicy};
use crate::error::{SaltError, SaltResult};
use crate::producer::Producer;
use crate::registry::{
    ExecutionMode, HandlerMetadata, HandlerRegistration, HandlerRegistry, PublisherInfo, SchemaRegistry,
};
use crate::schema::{Payload, Schema};
use crate::topic::TopicPattern;
use bon::Builder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// 声明选项
#[derive(Builder, Debug, Clone)]
pub struct DeclareOptions {
    #[builder(into, default = "v1".to_string())]
    pub version: String,
    #[builder(into)]
    pub description: Option<String>,
    pub publisher: Option<PublisherInfo>,
}

impl Default for DeclareOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// 订阅选项
#[derive(Builder, Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// 订阅版本；缺省为 `latest`
    #[builder(into)]
    pub version: Option<String>,
    /// 展示名；缺省为 `saltbus.<pattern>.<handler>`
    #[builder(into)]
    pub name: Option<String>,
    pub max_retries: Option<u32>,
    pub retry_backoff: Option<Duration>,
}

pub struct EventHub {
    binder: Arc<SchemaBinder>,
    handlers: Arc<HandlerRegistry>,
    producer: Arc<Producer>,
    default_retry: RetryPolicy,
}

impl EventHub {
    pub fn new(
        registry: Arc<dyn SchemaRegistry>,
        handlers: Arc<HandlerRegistry>,
        producer: Arc<Producer>,
    ) -> Self {
        Self {
            binder: Arc::new(SchemaBinder::new(registry)),
            handlers,
            producer,
            default_retry: RetryPolicy::default(),
        }
    }

    /// 订阅未指定重试参数时使用的策略
    pub fn with_default_retry(mut self, retry: RetryPolicy) -> Self {
        self.default_retry = retry;
        self
    }

    pub fn binder(&self) -> &Arc<SchemaBinder> {
        &self.binder
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    pub fn producer(&self) -> &Arc<Producer> {
        &self.producer
    }

    /// 声明广播主题
    pub async fn declare<T: Payload + Serialize>(
        &self,
        topic: &str,
        opts: DeclareOptions,
    ) -> SaltResult<EventHandle<T>> {
        let decl = self
            .declare_schema(topic, ExecutionMode::Broadcast, T::schema()?, publisher_of::<T>(opts))
            .await?;
        Ok(EventHandle::new(decl, self.binder.clone(), self.producer.clone()))
    }

    /// 声明 RPC 主题
    pub async fn declare_rpc<T: Payload + Serialize>(
        &self,
        topic: &str,
        opts: DeclareOptions,
    ) -> SaltResult<RpcHandle<T>> {
        let decl = self
            .declare_schema(topic, ExecutionMode::Rpc, T::schema()?, publisher_of::<T>(opts))
            .await?;
        Ok(RpcHandle::new(decl, self.binder.clone(), self.producer.clone()))
    }

    /// 以显式构建的 Schema 声明主题
    pub async fn declare_schema(
        &self,
        topic: &str,
        mode: ExecutionMode,
        schema: Schema,
        opts: DeclareOptions,
    ) -> SaltResult<Arc<Declaration>> {
        let pattern = TopicPattern::new(topic)?;
        if pattern.has_wildcards() {
            return Err(SaltError::InvalidPattern {
                pattern: topic.to_string(),
                reason: "declared topics cannot contain wildcards".to_string(),
            });
        }

        let decl = Declaration::builder()
            .topic(topic)
            .version(opts.version)
            .schema(schema)
            .mode(mode)
            .publisher(opts.publisher.unwrap_or_default())
            .maybe_description(opts.description)
            .build();
        self.binder.declare(&decl).await?;
        Ok(Arc::new(decl))
    }

    /// 声明 RPC 成功响应 Schema
    pub fn declare_response<R: Payload>(&self, topic: &str) -> SaltResult<()> {
        self.binder.declare_response(topic, R::schema()?);
        Ok(())
    }

    /// 声明 RPC 业务错误 Schema
    pub fn declare_error<E: Payload>(&self, topic: &str) -> SaltResult<()> {
        self.binder.declare_error(topic, E::schema()?);
        Ok(())
    }

    /// 订阅主题模式，返回处理器注册
    pub async fn subscribe(
        &self,
        pattern: &str,
        opts: SubscribeOptions,
        handler: Arc<dyn Handler>,
    ) -> SaltResult<Arc<HandlerRegistration>> {
        let wildcard = TopicPattern::new(pattern)?.has_wildcards();
        let schema = match self.binder.resolve(pattern, opts.version.as_deref()).await {
            Ok(schema) => schema,
            Err(err) => {
                tracing::warn!(
                    topic = pattern,
                    version = opts.version.as_deref().unwrap_or("latest"),
                    error = %err,
                    "subscriber schema unavailable, will retry on first message"
                );
                None
            }
        };
        if wildcard {
            tracing::debug!(topic = pattern, "wildcard subscription, payloads are not validated");
        }

        let wrapped = Arc::new(ValidatingHandler::new(
            pattern,
            opts.version.clone(),
            handler,
            self.binder.clone(),
            schema,
            !wildcard,
        ));

        let retry = RetryPolicy::new(
            opts.max_retries.unwrap_or(self.default_retry.max_retries),
            opts.retry_backoff.unwrap_or(self.default_retry.backoff),
        );
        let registration = self.handlers.register(
            pattern,
            wrapped,
            HandlerMetadata {
                name: opts.name,
                version: opts.version,
                retry,
            },
        )?;

        if let Err(err) = self
            .binder
            .registry()
            .track_subscriber(pattern, registration.name())
            .await
        {
            tracing::debug!(topic = pattern, error = %err, "could not track subscriber");
        }

        tracing::info!(
            topic = pattern,
            handler = registration.name(),
            version = registration.version().unwrap_or("latest"),
            "subscribed"
        );
        Ok(registration)
    }

    /// 以类型化闭包订阅
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
        let handler: Arc<dyn Handler> = Arc::new(TypedHandler::new(name, f));
        self.subscribe(pattern, opts, handler).await
    }
}

fn publisher_of<T>(mut opts: DeclareOptions) -> DeclareOptions {
    if opts.publisher.is_none() {
        let full = std::any::type_name::<T>();
        let (module, class) = full.rsplit_once("::").unwrap_or(("", full));
        opts.publisher = Some(PublisherInfo::new(module, class));
    }
    opts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemorySchemaRegistry;
    use crate::transport::{MessageConsumer, Transport, TransportError};
    use async_trait::async_trait;
    use serde::Deserialize;

    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn send(&self, _: &str, _: String, _: &str) -> Result<(), TransportError> {
            Ok(())
        }
        async fn send_and_wait(&self, _: &str, _: String, _: &str, timeout: Duration) -> Result<String, TransportError> {
            Err(TransportError::Timeout { timeout })
        }
        async fn declare_bindings(&self, _: &[String]) -> Result<(), TransportError> {
            Ok(())
        }
        fn attach(&self, _: Arc<dyn MessageConsumer>) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[derive(Serialize, Deserialize, saltbus_macros::Payload)]
    struct Ping {
        n: i64,
    }

    fn hub() -> (Arc<InMemorySchemaRegistry>, EventHub) {
        let registry = Arc::new(InMemorySchemaRegistry::new());
        let producer = Arc::new(Producer::builder().transport(Arc::new(NullTransport)).build());
        let hub = EventHub::new(registry.clone(), Arc::new(HandlerRegistry::new()), producer);
        (registry, hub)
    }

    #[tokio::test]
    async fn declare_records_publisher_identity() {
        let (registry, hub) = hub();
        let handle = hub.declare::<Ping>("ping", DeclareOptions::default()).await.unwrap();
        assert_eq!(handle.version(), "v1");

        let record = registry.get("ping", "v1").await.unwrap();
        assert_eq!(record.publisher().class, "Ping");
        assert!(record.publisher().module.ends_with("hub::tests"));
    }

    #[tokio::test]
    async fn wildcard_topics_cannot_be_declared() {
        let (_, hub) = hub();
        let err = hub.declare::<Ping>("ping.*", DeclareOptions::default()).await;
        assert!(matches!(err, Err(SaltError::InvalidPattern { .. })));
    }

    #[tokio::test]
    async fn invalid_payloads_never_reach_the_transport() {
        let (_, hub) = hub();
        let handle = hub
            .declare_schema(
                "raw",
                ExecutionMode::Broadcast,
                Schema::new("Raw", vec![crate::schema::FieldSpec::integer("n")]).unwrap(),
                DeclareOptions::default(),
            )
            .await
            .unwrap();
        let handle: EventHandle<serde_json::Value> =
            EventHandle::new(handle, hub.binder().clone(), hub.producer().clone());
        let err = handle.publish(&serde_json::json!({"n": "x"})).await.unwrap_err();
        assert!(matches!(err, SaltError::Validation(_)));
    }

    #[tokio::test]
    async fn subscribe_tracks_subscriber_and_applies_retry_defaults() {
        let (registry, hub) = hub();
        let hub = hub.with_default_retry(RetryPolicy::new(2, Duration::from_millis(5)));
        hub.declare::<Ping>("ping", DeclareOptions::default()).await.unwrap();

        let registration = hub
            .subscribe_typed("ping", "pong", SubscribeOptions::default(), |_ctx, p: Ping| async move {
                Ok::<_, HandlerError>(p.n)
            })
            .await
            .unwrap();

        assert_eq!(registration.name(), "saltbus.ping.pong");
        assert_eq!(registration.retry().max_retries, 2);
        assert_eq!(registry.subscribers("ping"), ["saltbus.ping.pong"]);

        let custom = hub
            .subscribe_typed(
                "ping",
                "other",
                SubscribeOptions::builder().name("audit").max_retries(0).version("v1").build(),
                |_ctx, _p: Ping| async move { Ok::<_, HandlerError>(()) },
            )
            .await
            .unwrap();
        assert_eq!(custom.name(), "audit");
        assert_eq!(custom.retry().max_retries, 0);
        assert_eq!(hub.handlers().count(Some("ping")), 2);
    }
}
