//! 核心统一错误定义
//!
//! 按调用方可采取的处置方式分组：
//! - 校验/冲突类错误不会被自动重试；
//! - 注册表不可用属于瞬时基础设施故障，由声明方本地缓存后延迟重试；
//! - 发布/超时属于传输层故障，始终抛给直接调用方；
//! - 分发阶段（反序列化、查找处理器）失败会整体上抛，交由传输层的重投机制处理。
//!
use crate::dispatch::RpcError;
use crate::schema::ValidationErrors;
use std::time::Duration;
use thiserror::Error;

/// 统一错误类型
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum SaltError {
    // --- 校验/Schema ---
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),
    #[error("schema conflict: topic={topic}, version={version}")]
    SchemaConflict { topic: String, version: String },
    #[error("schema registry unavailable: {reason}")]
    RegistryUnavailable { reason: String },
    #[error("schema not found: topic={topic}, version={version}")]
    SchemaNotFound { topic: String, version: String },
    #[error("invalid schema: {reason}")]
    InvalidSchema { reason: String },
    #[error("invalid topic pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    // --- 传输/RPC ---
    #[error("publish failed: {reason}")]
    Publish { reason: String },
    #[error("no response received within {timeout:?} for routing key '{topic}'")]
    Timeout { topic: String, timeout: Duration },
    #[error("no handlers found for routing key '{topic}'")]
    NoHandlers { topic: String },
    #[error("no results returned from handlers for routing key '{topic}'")]
    EmptyResponse { topic: String },
    #[error("handler '{handler}' failed: {reason}")]
    HandlerFailed { handler: String, reason: String },
    /// 调用方显式要求将业务错误转换为错误时使用（见 `RpcResponse::into_success`）
    #[error("rpc rejected: {0}")]
    Rpc(RpcError),

    // --- 分发 ---
    #[error("invalid envelope: {reason}")]
    InvalidEnvelope { reason: String },
    #[error("dispatch failed: routing_key={routing_key}, reason={reason}")]
    Dispatch { routing_key: String, reason: String },

    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },
}

impl SaltError {
    pub fn registry_unavailable(reason: impl Into<String>) -> Self {
        Self::RegistryUnavailable {
            reason: reason.into(),
        }
    }

    pub fn publish(reason: impl Into<String>) -> Self {
        Self::Publish {
            reason: reason.into(),
        }
    }

    pub fn invalid_schema(reason: impl Into<String>) -> Self {
        Self::InvalidSchema {
            reason: reason.into(),
        }
    }
}

/// 统一 Result 类型别名
pub type SaltResult<T> = Result<T, SaltError>;
