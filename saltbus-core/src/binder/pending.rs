//! 待重试注册（PendingRegistrations）
//!
//! 声明时若注册表不可达，记录被暂存于此，首次发布时或显式 `flush` 时重试。
//! 以 (topic, version) 为键，重复暂存以最后一次为准。
//!
use crate::registry::SchemaRecord;
use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct PendingRegistrations {
    records: DashMap<(String, String), SchemaRecord>,
}

impl PendingRegistrations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, record: SchemaRecord) {
        let key = (record.topic().to_string(), record.version().to_string());
        self.records.insert(key, record);
    }

    pub fn get(&self, topic: &str, version: &str) -> Option<SchemaRecord> {
        self.records
            .get(&(topic.to_string(), version.to_string()))
            .map(|r| r.value().clone())
    }

    pub fn contains(&self, topic: &str, version: &str) -> bool {
        self.records
            .contains_key(&(topic.to_string(), version.to_string()))
    }

    pub fn remove(&self, topic: &str, version: &str) -> Option<SchemaRecord> {
        self.records
            .remove(&(topic.to_string(), version.to_string()))
            .map(|(_, r)| r)
    }

    /// 快照（按 topic、version 排序）
    pub fn snapshot(&self) -> Vec<SchemaRecord> {
        let mut records: Vec<SchemaRecord> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| (a.topic(), a.version()).cmp(&(b.topic(), b.version())));
        records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
