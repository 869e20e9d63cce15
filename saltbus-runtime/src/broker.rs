//! 进程内主题代理（InMemoryBroker）
//!
//! 实现核心的 `Transport` 协议，用于单进程部署与测试：
//! - 入站队列为有界 mpsc 通道，工作循环以 `for_each_concurrent` 并发调用挂载的消费者（分发器）；
//! - RPC 结果后端：按消息 ID 保存 oneshot 发送端，分发完成后回填序列化的分发报告；
//! - 分发致命失败时重投，超过 `max_redeliveries` 后放弃；等待中的 RPC 调用方收到 `Remote` 错误；
//! - 队列绑定仅做记录，不做路由过滤，所有消息都会交给分发器。
//!
use async_trait::async_trait;
use bon::Builder;
use dashmap::DashMap;
use futures_util::StreamExt;
use saltbus_core::transport::{InboundMessage, MessageConsumer, Transport, TransportError};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

type ResultSender = oneshot::Sender<Result<String, TransportError>>;

/// 代理配置
#[derive(Builder, Debug, Clone)]
pub struct BrokerConfig {
    #[builder(default = 4)]
    pub concurrency: usize,
    #[builder(default = 1024)]
    pub queue_capacity: usize,
    #[builder(default = 3)]
    pub max_redeliveries: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

pub struct InMemoryBroker {
    config: BrokerConfig,
    sender: mpsc::Sender<InboundMessage>,
    receiver: Mutex<Option<mpsc::Receiver<InboundMessage>>>,
    consumer: OnceLock<Arc<dyn MessageConsumer>>,
    results: DashMap<String, ResultSender>,
    bindings: RwLock<Vec<String>>,
    token: CancellationToken,
}

impl InMemoryBroker {
    pub fn new(config: BrokerConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            config,
            sender,
            receiver: Mutex::new(Some(receiver)),
            consumer: OnceLock::new(),
            results: DashMap::new(),
            bindings: RwLock::new(Vec::new()),
            token: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// 已声明的队列绑定
    pub fn bindings(&self) -> Vec<String> {
        self.bindings.read().map(|b| b.clone()).unwrap_or_default()
    }

    /// 等待结果的 RPC 调用数
    pub fn pending_results(&self) -> usize {
        self.results.len()
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 启动工作循环；只能启动一次
    pub fn start(self: &Arc<Self>) -> Result<JoinHandle<()>, TransportError> {
        let receiver = self
            .receiver
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .ok_or(TransportError::Closed)?;
        let consumer = self.consumer.get().cloned().ok_or_else(|| TransportError::Send {
            reason: "no consumer attached".to_string(),
        })?;

        let this = self.clone();
        Ok(tokio::spawn(async move {
            let concurrency = this.config.concurrency.max(1);
            tracing::info!(concurrency, "broker worker started");
            ReceiverStream::new(receiver)
                .take_until(this.token.clone().cancelled_owned())
                .for_each_concurrent(Some(concurrency), |message| {
                    let this = this.clone();
                    let consumer = consumer.clone();
                    async move { this.deliver(consumer.as_ref(), message).await }
                })
                .await;
            this.fail_pending();
            tracing::info!("broker worker stopped");
        }))
    }

    /// 停止接收新消息并结束工作循环
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    async fn deliver(&self, consumer: &dyn MessageConsumer, message: InboundMessage) {
        match consumer.consume(&message).await {
            Ok(report) => {
                let Some((_, reply)) = self.results.remove(&message.message_id) else {
                    return;
                };
                let body = serde_json::to_string(&report).map_err(|e| TransportError::Remote {
                    reason: e.to_string(),
                });
                let _ = reply.send(body);
            }
            Err(err) if message.delivery_attempt <= self.config.max_redeliveries => {
                tracing::warn!(
                    routing_key = %message.routing_key,
                    message_id = %message.message_id,
                    delivery_attempt = message.delivery_attempt,
                    error = %err,
                    "dispatch failed, redelivering"
                );
                let mut retry = message;
                retry.delivery_attempt += 1;
                if let Err(e) = self.sender.try_send(retry) {
                    let message = match e {
                        mpsc::error::TrySendError::Full(m) | mpsc::error::TrySendError::Closed(m) => m,
                    };
                    tracing::error!(
                        routing_key = %message.routing_key,
                        message_id = %message.message_id,
                        "queue unavailable, message dropped"
                    );
                    self.reject(&message.message_id, "redelivery failed: queue unavailable".to_string());
                }
            }
            Err(err) => {
                tracing::error!(
                    routing_key = %message.routing_key,
                    message_id = %message.message_id,
                    delivery_attempt = message.delivery_attempt,
                    error = %err,
                    "dispatch failed, giving up"
                );
                self.reject(&message.message_id, err.to_string());
            }
        }
    }

    fn reject(&self, message_id: &str, reason: String) {
        if let Some((_, reply)) = self.results.remove(message_id) {
            let _ = reply.send(Err(TransportError::Remote { reason }));
        }
    }

    fn fail_pending(&self) {
        let ids: Vec<String> = self.results.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, reply)) = self.results.remove(&id) {
                let _ = reply.send(Err(TransportError::Closed));
            }
        }
    }

    async fn enqueue(&self, message: InboundMessage) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.sender
            .send(message)
            .await
            .map_err(|_| TransportError::Closed)
    }
}

#[async_trait]
impl Transport for InMemoryBroker {
    async fn send(&self, routing_key: &str, body: String, message_id: &str) -> Result<(), TransportError> {
        self.enqueue(InboundMessage::new(routing_key, message_id, body)).await
    }

    async fn send_and_wait(
        &self,
        routing_key: &str,
        body: String,
        message_id: &str,
        timeout: Duration,
    ) -> Result<String, TransportError> {
        let (tx, rx) = oneshot::channel();
        self.results.insert(message_id.to_string(), tx);

        if let Err(err) = self.enqueue(InboundMessage::new(routing_key, message_id, body)).await {
            self.results.remove(message_id);
            return Err(err);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                // 调用方不再等待；处理器可能仍在执行
                self.results.remove(message_id);
                Err(TransportError::Timeout { timeout })
            }
        }
    }

    async fn declare_bindings(&self, routing_keys: &[String]) -> Result<(), TransportError> {
        let mut bindings = self.bindings.write().map_err(|_| TransportError::Send {
            reason: "bindings lock poisoned".to_string(),
        })?;
        for key in routing_keys {
            if !bindings.contains(key) {
                bindings.push(key.clone());
            }
        }
        tracing::info!(bindings = bindings.len(), "queue bindings declared");
        Ok(())
    }

    fn attach(&self, consumer: Arc<dyn MessageConsumer>) -> Result<(), TransportError> {
        self.consumer.set(consumer).map_err(|_| TransportError::Send {
            reason: "consumer already attached".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use saltbus_core::SaltResult;
    use saltbus_core::dispatch::{DispatchReport, ReportStatus};
    use saltbus_core::error::SaltError;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// 前 `fail_first` 次投递返回致命错误
    struct Flaky {
        fail_first: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl MessageConsumer for Flaky {
        async fn consume(&self, message: &InboundMessage) -> SaltResult<DispatchReport> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_first {
                return Err(SaltError::Dispatch {
                    routing_key: message.routing_key.clone(),
                    reason: "boom".into(),
                });
            }
            Ok(DispatchReport {
                status: ReportStatus::NoHandlers,
                routing_key: message.routing_key.clone(),
                message_id: message.message_id.clone(),
                is_rpc: true,
                handlers_executed: 0,
                results: Vec::new(),
            })
        }
    }

    fn broker(fail_first: u32, max_redeliveries: u32) -> (Arc<InMemoryBroker>, Arc<Flaky>) {
        let broker = Arc::new(InMemoryBroker::new(
            BrokerConfig::builder().max_redeliveries(max_redeliveries).build(),
        ));
        let consumer = Arc::new(Flaky {
            fail_first,
            calls: AtomicU32::new(0),
        });
        broker.attach(consumer.clone()).unwrap();
        (broker, consumer)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn redelivers_until_dispatch_succeeds() {
        let (broker, consumer) = broker(2, 3);
        let worker = broker.start().unwrap();

        let body = broker
            .send_and_wait("rpc.x", "{}".into(), "m1", Duration::from_secs(1))
            .await
            .unwrap();
        let report: DispatchReport = serde_json::from_str(&body).unwrap();
        assert_eq!(report.message_id, "m1");
        assert_eq!(consumer.calls.load(Ordering::SeqCst), 3);
        assert_eq!(broker.pending_results(), 0);

        broker.shutdown();
        worker.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn gives_up_after_max_redeliveries() {
        let (broker, consumer) = broker(10, 1);
        let _worker = broker.start().unwrap();

        let err = broker
            .send_and_wait("rpc.x", "{}".into(), "m2", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Remote { .. }));
        assert_eq!(consumer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn wait_times_out_without_worker() {
        let (broker, _) = broker(0, 0);
        let err = broker
            .send_and_wait("rpc.x", "{}".into(), "m3", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout { .. }));
        assert_eq!(broker.pending_results(), 0);
    }

    #[tokio::test]
    async fn start_twice_fails_and_closed_broker_rejects_sends() {
        let (broker, _) = broker(0, 0);
        let worker = broker.start().unwrap();
        assert!(matches!(broker.start(), Err(TransportError::Closed)));

        broker.shutdown();
        worker.await.unwrap();
        let err = broker.send("a.b", "{}".into(), "m4").await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[tokio::test]
    async fn bindings_are_recorded_once() {
        let (broker, _) = broker(0, 0);
        broker
            .declare_bindings(&["a.b".to_string(), "user.#".to_string()])
            .await
            .unwrap();
        broker.declare_bindings(&["a.b".to_string()]).await.unwrap();
        assert_eq!(broker.bindings(), ["a.b", "user.#"]);
    }
}
