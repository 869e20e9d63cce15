//! 内存版 Schema 注册表（InMemorySchemaRegistry）
//!
//! 基于 `DashMap` 的注册表实现：
//! - 冲突检查在分片写锁（`entry`）内完成，“读取-比较-写入”对同一主题原子；
//! - Schema 以序列化文本逐字节比较，字段顺序不同即视为冲突；
//! - `latest` 按版本比较器取最大版本，比较相等时以版本字符串决胜，保证结果确定；
//! - `set_available(false)` 可模拟后端不可达，便于测试声明方的降级路径。
//!
use super::{RegisterOutcome, SchemaRecord, SchemaRegistry};
use crate::error::{SaltError, SaltResult};
use crate::version::{compare_versions, is_latest};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug)]
pub struct InMemorySchemaRegistry {
    schemas: DashMap<String, HashMap<String, SchemaRecord>>,
    subscribers: DashMap<String, Vec<String>>,
    available: AtomicBool,
}

impl Default for InMemorySchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySchemaRegistry {
    pub fn new() -> Self {
        Self {
            schemas: DashMap::new(),
            subscribers: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    /// 切换可用状态（模拟远程存储故障）
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// 某主题已登记的订阅方
    pub fn subscribers(&self, topic: &str) -> Vec<String> {
        self.subscribers
            .get(topic)
            .map(|s| s.value().clone())
            .unwrap_or_default()
    }

    fn ensure_available(&self) -> SaltResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SaltError::registry_unavailable("in-memory registry marked unavailable"))
        }
    }
}

#[async_trait]
impl SchemaRegistry for InMemorySchemaRegistry {
    async fn register(&self, record: SchemaRecord) -> SaltResult<RegisterOutcome> {
        self.ensure_available()?;

        let mut versions = self.schemas.entry(record.topic().to_string()).or_default();
        match versions.get(record.version()) {
            Some(existing) if same_document(existing.schema(), record.schema()) => Ok(RegisterOutcome::Unchanged {
                existing_schema: existing.schema().clone(),
            }),
            Some(_) => Err(SaltError::SchemaConflict {
                topic: record.topic().to_string(),
                version: record.version().to_string(),
            }),
            None => {
                versions.insert(record.version().to_string(), record);
                Ok(RegisterOutcome::Created)
            }
        }
    }

    async fn get(&self, topic: &str, version: &str) -> SaltResult<SchemaRecord> {
        self.ensure_available()?;

        let not_found = || SaltError::SchemaNotFound {
            topic: topic.to_string(),
            version: version.to_string(),
        };
        let versions = self.schemas.get(topic).ok_or_else(not_found)?;

        let record = if is_latest(Some(version)) {
            versions
                .values()
                .max_by(|a, b| {
                    compare_versions(a.version(), b.version())
                        .then_with(|| a.version().cmp(b.version()))
                })
                .cloned()
        } else {
            versions.get(version).cloned()
        };
        record.ok_or_else(not_found)
    }

    async fn track_subscriber(&self, topic: &str, handler_name: &str) -> SaltResult<()> {
        self.ensure_available()?;

        let mut handlers = self.subscribers.entry(topic.to_string()).or_default();
        if !handlers.iter().any(|h| h == handler_name) {
            handlers.push(handler_name.to_string());
        }
        Ok(())
    }

    async fn topics(&self) -> SaltResult<Vec<String>> {
        self.ensure_available()?;

        let mut topics: Vec<String> = self.schemas.iter().map(|e| e.key().clone()).collect();
        topics.sort();
        Ok(topics)
    }

    async fn versions(&self, topic: &str) -> SaltResult<Vec<String>> {
        self.ensure_available()?;

        let mut versions: Vec<String> = self
            .schemas
            .get(topic)
            .map(|v| v.keys().cloned().collect())
            .unwrap_or_default();
        versions.sort_by(|a, b| compare_versions(a, b).then_with(|| a.cmp(b)));
        Ok(versions)
    }
}

// 按序列化文本逐字节比较；字段顺序不同也视为冲突
fn same_document(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    a.to_string() == b.to_string()
}
