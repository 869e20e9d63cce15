//! 传输层协议（Transport）
//!
//! 核心对外部消息中间件的最小需求：
//! - `send`：按路由键发布（不等待投递）；
//! - `send_and_wait`：RPC 发送并阻塞等待关联结果，超时返回超时错误；
//! - `declare_bindings`：启动时按处理器注册表建立队列绑定；
//! - `attach`：挂载“每条入站消息调用一次”的消费入口（即分发器）。
//!
use crate::dispatch::DispatchReport;
use crate::error::SaltResult;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// 入站消息；路由键来自传输层上下文，而非载荷
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub routing_key: String,
    pub message_id: String,
    pub body: String,
    /// 第几次投递（从 1 开始）
    pub delivery_attempt: u32,
}

impl InboundMessage {
    pub fn new(
        routing_key: impl Into<String>,
        message_id: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            routing_key: routing_key.into(),
            message_id: message_id.into(),
            body: body.into(),
            delivery_attempt: 1,
        }
    }
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("timed out after {timeout:?}")]
    Timeout { timeout: Duration },
    #[error("send failed: {reason}")]
    Send { reason: String },
    #[error("transport closed")]
    Closed,
    #[error("remote failure: {reason}")]
    Remote { reason: String },
}

/// 入站消息消费者
#[async_trait]
pub trait MessageConsumer: Send + Sync {
    async fn consume(&self, message: &InboundMessage) -> SaltResult<DispatchReport>;
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, routing_key: &str, body: String, message_id: &str) -> Result<(), TransportError>;

    /// 返回序列化的分发报告
    async fn send_and_wait(
        &self,
        routing_key: &str,
        body: String,
        message_id: &str,
        timeout: Duration,
    ) -> Result<String, TransportError>;

    async fn declare_bindings(&self, routing_keys: &[String]) -> Result<(), TransportError>;

    fn attach(&self, consumer: Arc<dyn MessageConsumer>) -> Result<(), TransportError>;
}
