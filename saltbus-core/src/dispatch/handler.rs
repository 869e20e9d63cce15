//! 消息处理器（Handler）
//!
//! 处理器是一个显式签名的异步函数：`(上下文, 已剥离元数据的载荷) -> 可选响应`。
//! 分发器在同步（RPC）与异步（广播）两条路径上都以同一签名调用它，
//! 不需要为直接调用重建任何框架执行上下文。
//!
use crate::envelope::Meta;
use crate::schema::ValidationErrors;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::future::Future;
use thiserror::Error;
use uuid::Uuid;

/// 单次处理调用的上下文
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub message_id: String,
    pub routing_key: String,
    pub handler_id: Uuid,
    pub handler_name: String,
    /// 派生任务 ID：广播 `<message_id>:<handler_id>`，RPC `<message_id>:rpc:<handler_id>`
    pub task_id: String,
    pub is_rpc: bool,
    pub meta: Option<Meta>,
    /// 第几次执行（从 1 开始）
    pub attempt: u32,
}

impl HandlerContext {
    pub fn version(&self) -> Option<&str> {
        self.meta.as_ref().and_then(Meta::version)
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.meta.as_ref().and_then(Meta::correlation_id)
    }
}

/// 业务级 RPC 错误：处理器“执行了但拒绝了请求”
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct RpcError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    /// 错误 Schema 声明的其余字段
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl RpcError {
    pub const CODE_KEY: &'static str = "error_code";
    pub const MESSAGE_KEY: &'static str = "error_message";
    pub const DETAILS_KEY: &'static str = "details";

    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            extra: Map::new(),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// 线上错误载荷 `{error_code, error_message, details?}`
    pub fn to_payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert(Self::CODE_KEY.into(), Value::String(self.code.clone()));
        payload.insert(Self::MESSAGE_KEY.into(), Value::String(self.message.clone()));
        if let Some(details) = &self.details {
            payload.insert(Self::DETAILS_KEY.into(), details.clone());
        }
        for (key, value) in &self.extra {
            payload.insert(key.clone(), value.clone());
        }
        payload
    }

    /// 从错误载荷还原；缺失字段以 `UNKNOWN`/原始载荷文本兜底
    pub fn from_payload(payload: &Map<String, Value>) -> Self {
        let text = |key: &str| payload.get(key).and_then(Value::as_str).map(str::to_string);
        Self {
            code: text(Self::CODE_KEY).unwrap_or_else(|| "UNKNOWN".to_string()),
            message: text(Self::MESSAGE_KEY)
                .unwrap_or_else(|| Value::Object(payload.clone()).to_string()),
            details: payload.get(Self::DETAILS_KEY).filter(|v| !v.is_null()).cloned(),
            extra: payload
                .iter()
                .filter(|(key, _)| ![Self::CODE_KEY, Self::MESSAGE_KEY, Self::DETAILS_KEY].contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        }
    }

    /// 以按错误 Schema 规整后的载荷重建；载荷未保留的错误码与信息沿用原值
    pub fn reshape(self, mut payload: Map<String, Value>) -> Self {
        let Self { code, message, .. } = self;
        payload.entry(Self::CODE_KEY).or_insert(Value::String(code));
        payload.entry(Self::MESSAGE_KEY).or_insert(Value::String(message));
        Self::from_payload(&payload)
    }

    /// 载荷是否具有错误载荷的形状
    pub fn is_error_payload(payload: &Map<String, Value>) -> bool {
        payload.contains_key(Self::CODE_KEY) || payload.contains_key(Self::MESSAGE_KEY)
    }
}

/// 处理器错误
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum HandlerError {
    /// 业务拒绝（RPC 路径下转换为结构化错误结果）
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),
    #[error("invalid payload: {0}")]
    Validation(#[from] ValidationErrors),
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl HandlerError {
    pub fn failed(reason: impl std::fmt::Display) -> Self {
        Self::Failed(anyhow::anyhow!("{reason}"))
    }
}

pub type HandlerResult = Result<Option<Value>, HandlerError>;

#[async_trait]
pub trait Handler: Send + Sync {
    /// 处理器名称（用于默认展示名与日志）
    fn name(&self) -> &str;

    async fn handle(&self, ctx: &HandlerContext, payload: Map<String, Value>) -> HandlerResult;
}

/// 闭包适配器
pub struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> FnHandler<F> {
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(HandlerContext, Map<String, Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, ctx: &HandlerContext, payload: Map<String, Value>) -> HandlerResult {
        (self.f)(ctx.clone(), payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rpc_error_payload_shape() {
        let err = RpcError::new("NOT_FOUND", "user missing").with_details(json!({"id": 7}));
        let payload = err.to_payload();
        assert_eq!(
            Value::Object(payload.clone()),
            json!({"error_code": "NOT_FOUND", "error_message": "user missing", "details": {"id": 7}})
        );
        assert!(RpcError::is_error_payload(&payload));
        assert_eq!(RpcError::from_payload(&payload), err);
        assert_eq!(err.to_string(), "NOT_FOUND: user missing");
    }

    #[test]
    fn partial_error_payload_is_tolerated() {
        let payload = json!({"error_message": "boom"}).as_object().cloned().unwrap();
        let err = RpcError::from_payload(&payload);
        assert_eq!(err.code, "UNKNOWN");
        assert_eq!(err.message, "boom");
        assert!(err.details.is_none());
    }

    #[test]
    fn reshape_keeps_declared_extras_and_original_code() {
        let shaped = json!({"error_message": "no", "hint": "retry later"}).as_object().cloned().unwrap();
        let err = RpcError::new("NOPE", "no").reshape(shaped);
        assert_eq!(err.code, "NOPE");
        assert_eq!(err.extra["hint"], "retry later");
        assert_eq!(
            Value::Object(err.to_payload()),
            json!({"error_code": "NOPE", "error_message": "no", "hint": "retry later"})
        );
    }
}
