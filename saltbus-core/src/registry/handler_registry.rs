//! 处理器注册表（HandlerRegistry）
//!
//! 进程内“路由模式 → 处理器”的映射：
//! - 同一模式可挂多个处理器（广播扇出）；
//! - 同一路由键可同时命中精确模式与通配模式；
//! - `lookup` 的结果按注册顺序排列，RPC 场景下“先注册者优先”可复现。
//!
//! 注册只发生在组件加载期，之后以读为主。`count` 复用 `lookup`，
//! 二者都只持有分片读锁，不存在重入加锁的问题。
//!
use crate::dispatch::{Handler, RetryPolicy};
use crate::error::SaltResult;
use crate::topic::TopicPattern;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// 注册时提供的元数据
#[derive(Debug, Clone, Default)]
pub struct HandlerMetadata {
    /// 展示名；缺省为 `saltbus.<pattern>.<handler>`
    pub name: Option<String>,
    /// 声明版本；缺省为 `latest`（接受所有版本）
    pub version: Option<String>,
    pub retry: RetryPolicy,
}

/// 一条处理器注册
pub struct HandlerRegistration {
    id: Uuid,
    pattern: TopicPattern,
    name: String,
    version: Option<String>,
    retry: RetryPolicy,
    seq: u64,
    handler: Arc<dyn Handler>,
}

impl HandlerRegistration {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// 注册序号（单调递增）
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    pub fn matches(&self, routing_key: &str) -> bool {
        self.pattern.matches(routing_key)
    }
}

impl fmt::Debug for HandlerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistration")
            .field("id", &self.id)
            .field("pattern", &self.pattern.as_str())
            .field("name", &self.name)
            .field("version", &self.version)
            .field("seq", &self.seq)
            .finish()
    }
}

#[derive(Default)]
pub struct HandlerRegistry {
    by_pattern: DashMap<String, Vec<Arc<HandlerRegistration>>>,
    seq: AtomicU64,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册处理器，返回注册记录
    pub fn register(
        &self,
        pattern: &str,
        handler: Arc<dyn Handler>,
        metadata: HandlerMetadata,
    ) -> SaltResult<Arc<HandlerRegistration>> {
        let pattern = TopicPattern::new(pattern)?;
        let name = metadata
            .name
            .unwrap_or_else(|| default_handler_name(pattern.as_str(), handler.name()));

        let registration = Arc::new(HandlerRegistration {
            id: Uuid::new_v4(),
            name,
            version: metadata.version,
            retry: metadata.retry,
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            handler,
            pattern,
        });

        self.by_pattern
            .entry(registration.pattern().to_string())
            .or_default()
            .push(registration.clone());

        tracing::debug!(
            pattern = registration.pattern(),
            handler = registration.name(),
            handler_id = %registration.id(),
            version = registration.version().unwrap_or("latest"),
            "handler registered"
        );
        Ok(registration)
    }

    /// 匹配路由键的全部注册（按注册顺序）
    pub fn lookup(&self, routing_key: &str) -> Vec<Arc<HandlerRegistration>> {
        let mut matched: Vec<Arc<HandlerRegistration>> = self
            .by_pattern
            .iter()
            .filter(|entry| entry.value().first().is_some_and(|r| r.matches(routing_key)))
            .flat_map(|entry| entry.value().clone())
            .collect();
        matched.sort_by_key(|r| r.seq());
        matched
    }

    /// 注册总数，或匹配指定路由键的注册数
    pub fn count(&self, routing_key: Option<&str>) -> usize {
        match routing_key {
            Some(key) => self.lookup(key).len(),
            None => self.by_pattern.iter().map(|e| e.value().len()).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count(None) == 0
    }

    /// 全部已注册模式（去重、排序），用于启动时建立队列绑定
    pub fn all_routing_keys(&self) -> Vec<String> {
        self.by_pattern
            .iter()
            .map(|e| e.key().clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// 过滤掉命中任一排除模式的路由键（如排除 `rpc.#`）
    pub fn subscribed_routing_keys(&self, exclude: &[&str]) -> SaltResult<Vec<String>> {
        let excluded = exclude
            .iter()
            .map(|p| TopicPattern::new(*p))
            .collect::<SaltResult<Vec<_>>>()?;

        Ok(self
            .all_routing_keys()
            .into_iter()
            .filter(|key| !excluded.iter().any(|p| p.matches(key)))
            .collect())
    }
}

fn default_handler_name(pattern: &str, handler: &str) -> String {
    format!("saltbus.{pattern}.{handler}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{FnHandler, HandlerContext, HandlerError};
    use serde_json::{Map, Value};

    fn noop(name: &str) -> Arc<dyn Handler> {
        Arc::new(FnHandler::new(name, |_ctx: HandlerContext, _p: Map<String, Value>| async {
            Ok::<_, HandlerError>(None)
        }))
    }

    #[test]
    fn lookup_merges_exact_and_wildcard_in_registration_order() {
        let registry = HandlerRegistry::new();
        registry.register("user.#", noop("audit"), HandlerMetadata::default()).unwrap();
        registry.register("user.created", noop("welcome"), HandlerMetadata::default()).unwrap();
        registry.register("user.*", noop("count"), HandlerMetadata::default()).unwrap();
        registry.register("order.created", noop("order"), HandlerMetadata::default()).unwrap();

        let names: Vec<String> = registry
            .lookup("user.created")
            .iter()
            .map(|r| r.name().to_string())
            .collect();
        assert_eq!(
            names,
            [
                "saltbus.user.#.audit",
                "saltbus.user.created.welcome",
                "saltbus.user.*.count"
            ]
        );
        assert_eq!(registry.count(Some("user.created")), 3);
        assert_eq!(registry.count(None), 4);
        assert_eq!(registry.count(Some("payment.done")), 0);
    }

    #[test]
    fn several_handlers_share_a_pattern() {
        let registry = HandlerRegistry::new();
        registry.register("t", noop("a"), HandlerMetadata::default()).unwrap();
        let named = HandlerMetadata {
            name: Some("custom".into()),
            version: Some("v2".into()),
            ..Default::default()
        };
        registry.register("t", noop("b"), named).unwrap();

        let found = registry.lookup("t");
        assert_eq!(found.len(), 2);
        assert_eq!(found[1].name(), "custom");
        assert_eq!(found[1].version(), Some("v2"));
        assert_ne!(found[0].id(), found[1].id());
        assert_eq!(registry.all_routing_keys(), ["t"]);
    }

    #[test]
    fn routing_keys_can_exclude_patterns() {
        let registry = HandlerRegistry::new();
        for p in ["rpc.add", "rpc.users.get", "user.created", "order.#"] {
            registry.register(p, noop("h"), HandlerMetadata::default()).unwrap();
        }

        assert_eq!(
            registry.all_routing_keys(),
            ["order.#", "rpc.add", "rpc.users.get", "user.created"]
        );
        assert_eq!(
            registry.subscribed_routing_keys(&["rpc.#"]).unwrap(),
            ["order.#", "user.created"]
        );
        assert!(registry.subscribed_routing_keys(&["bad..pattern"]).is_err());
    }

    #[test]
    fn invalid_patterns_are_rejected() {
        let registry = HandlerRegistry::new();
        assert!(registry.register("", noop("h"), HandlerMetadata::default()).is_err());
        assert!(registry.is_empty());
    }
}
