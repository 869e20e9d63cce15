//! Schema 注册表协议（SchemaRegistry）
//!
//! 按 (topic, version) 存储结构化 Schema 与发布方元数据：
//! - `register`：首次注册创建记录；同一 Schema 重复注册幂等；不同 Schema 报冲突；
//! - `get`：精确版本或 `latest`（按版本比较取最大）；
//! - `track_subscriber`：尽力而为的订阅方登记。
//!
//! 远程实现可能暂时不可达，此时应返回 `SaltError::RegistryUnavailable`，
//! 以便声明方将其与冲突错误区分处理。
//!
use crate::error::SaltResult;
use async_trait::async_trait;
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 执行模式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Broadcast,
    Rpc,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Broadcast => "broadcast",
            ExecutionMode::Rpc => "rpc",
        }
    }
}

/// 发布方标识（诊断用）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherInfo {
    pub module: String,
    pub class: String,
}

impl PublisherInfo {
    pub fn new(module: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            class: class.into(),
        }
    }
}

/// 注册表中存储的单元，创建后不可变
#[derive(Builder, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaRecord {
    #[builder(into)]
    topic: String,
    #[builder(into)]
    version: String,
    schema: Value,
    #[builder(default)]
    mode: ExecutionMode,
    response_schema: Option<Value>,
    error_schema: Option<Value>,
    #[builder(default)]
    publisher: PublisherInfo,
    #[builder(into)]
    description: Option<String>,
    #[builder(default = Utc::now())]
    registered_at: DateTime<Utc>,
}

impl SchemaRecord {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn response_schema(&self) -> Option<&Value> {
        self.response_schema.as_ref()
    }

    pub fn error_schema(&self) -> Option<&Value> {
        self.error_schema.as_ref()
    }

    pub fn publisher(&self) -> &PublisherInfo {
        &self.publisher
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }
}

/// 注册结果
#[derive(Debug, Clone, PartialEq)]
pub enum RegisterOutcome {
    /// 新建记录
    Created,
    /// 已存在完全相同的 Schema
    Unchanged { existing_schema: Value },
}

impl RegisterOutcome {
    pub fn created(&self) -> bool {
        matches!(self, RegisterOutcome::Created)
    }
}

#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    /// 注册 Schema；(topic, version) 上的冲突检查须为原子操作，
    /// 已有记录与新 Schema 序列化文本逐字节相同才算幂等重注册
    async fn register(&self, record: SchemaRecord) -> SaltResult<RegisterOutcome>;

    /// 获取 Schema；`version` 为 `latest` 时返回该主题最大版本
    async fn get(&self, topic: &str, version: &str) -> SaltResult<SchemaRecord>;

    /// 登记订阅方（尽力而为）
    async fn track_subscriber(&self, topic: &str, handler_name: &str) -> SaltResult<()>;

    /// 已注册的主题列表
    async fn topics(&self) -> SaltResult<Vec<String>>;

    /// 某主题已注册的版本（按版本升序）
    async fn versions(&self, topic: &str) -> SaltResult<Vec<String>>;
}
