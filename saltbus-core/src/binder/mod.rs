//! 事件/Schema 绑定（SchemaBinder）
//!
//! 声明期把 Schema 注册到注册表，并产出绑定了该 Schema 的发布/调用句柄：
//! - 新建记录记 info，幂等重复注册记 debug；
//! - 冲突记 error 并返回错误，声明失败；
//! - 注册表不可达记 warn，暂存为待重试注册，声明本身照常成功；
//! - RPC 的响应/错误 Schema 按主题保存在本实例内，供结果解包与处理器侧校验使用。
//!
//! 订阅方可通过 `resolve` 从注册表取回 Schema 文档并重建校验器，无需持有发布方的原始类型。
//!
mod handle;
mod pending;
mod subscriber;

pub use handle::{EventHandle, RpcHandle};
pub use pending::PendingRegistrations;
pub use subscriber::{TypedHandler, ValidatingHandler};

use crate::error::{SaltError, SaltResult};
use crate::registry::{ExecutionMode, PublisherInfo, RegisterOutcome, SchemaRecord, SchemaRegistry};
use crate::schema::Schema;
use crate::topic::TopicPattern;
use crate::version::{LATEST, is_latest};
use bon::Builder;
use dashmap::DashMap;
use std::sync::Arc;

/// 一次主题声明
#[derive(Builder, Debug, Clone)]
pub struct Declaration {
    #[builder(into)]
    topic: String,
    #[builder(into, default = "v1".to_string())]
    version: String,
    schema: Schema,
    #[builder(default)]
    mode: ExecutionMode,
    #[builder(default)]
    publisher: PublisherInfo,
    #[builder(into)]
    description: Option<String>,
}

impl Declaration {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn publisher(&self) -> &PublisherInfo {
        &self.publisher
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

pub struct SchemaBinder {
    registry: Arc<dyn SchemaRegistry>,
    pending: PendingRegistrations,
    responses: DashMap<String, Schema>,
    errors: DashMap<String, Schema>,
}

impl SchemaBinder {
    pub fn new(registry: Arc<dyn SchemaRegistry>) -> Self {
        Self {
            registry,
            pending: PendingRegistrations::new(),
            responses: DashMap::new(),
            errors: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<dyn SchemaRegistry> {
        &self.registry
    }

    pub fn pending(&self) -> &PendingRegistrations {
        &self.pending
    }

    /// 注册声明；不可达时暂存，冲突时失败
    pub async fn declare(&self, decl: &Declaration) -> SaltResult<()> {
        let record = self.record(decl);
        match self.registry.register(record.clone()).await {
            Ok(RegisterOutcome::Created) => {
                tracing::info!(
                    topic = decl.topic(),
                    version = decl.version(),
                    mode = decl.mode().as_str(),
                    "schema registered"
                );
                Ok(())
            }
            Ok(RegisterOutcome::Unchanged { .. }) => {
                tracing::debug!(topic = decl.topic(), version = decl.version(), "schema already registered");
                Ok(())
            }
            Err(err @ SaltError::SchemaConflict { .. }) => {
                tracing::error!(
                    topic = decl.topic(),
                    version = decl.version(),
                    publisher = %decl.publisher().class,
                    "schema conflict"
                );
                Err(err)
            }
            Err(SaltError::RegistryUnavailable { reason }) => {
                tracing::warn!(
                    topic = decl.topic(),
                    version = decl.version(),
                    reason = %reason,
                    "schema registry unavailable, registration deferred"
                );
                self.pending.push(record);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// 首次发布前的补注册；仍不可达时保留待重试项并放行
    pub async fn ensure_registered(&self, topic: &str, version: &str) -> SaltResult<()> {
        let Some(record) = self.pending.get(topic, version) else {
            return Ok(());
        };
        match self.registry.register(record).await {
            Ok(_) => {
                self.pending.remove(topic, version);
                tracing::info!(topic, version, "deferred schema registered");
                Ok(())
            }
            Err(SaltError::RegistryUnavailable { reason }) => {
                tracing::debug!(topic, version, reason = %reason, "schema registry still unavailable");
                Ok(())
            }
            Err(err) => {
                self.pending.remove(topic, version);
                tracing::error!(topic, version, error = %err, "deferred schema registration failed");
                Err(err)
            }
        }
    }

    /// 重试全部待注册项，返回成功数；遇到冲突立即返回错误
    pub async fn flush_pending(&self) -> SaltResult<usize> {
        let mut registered = 0;
        for record in self.pending.snapshot() {
            let (topic, version) = (record.topic().to_string(), record.version().to_string());
            match self.registry.register(record).await {
                Ok(_) => {
                    self.pending.remove(&topic, &version);
                    registered += 1;
                }
                Err(SaltError::RegistryUnavailable { .. }) => break,
                Err(err) => {
                    self.pending.remove(&topic, &version);
                    tracing::error!(topic = %topic, version = %version, error = %err, "pending schema registration failed");
                    return Err(err);
                }
            }
        }
        if registered > 0 {
            tracing::info!(registered, remaining = self.pending.len(), "pending schemas flushed");
        }
        Ok(registered)
    }

    pub fn declare_response(&self, topic: &str, schema: Schema) {
        tracing::debug!(topic, title = schema.title(), "response schema declared");
        self.responses.insert(topic.to_string(), schema);
    }

    pub fn declare_error(&self, topic: &str, schema: Schema) {
        tracing::debug!(topic, title = schema.title(), "error schema declared");
        self.errors.insert(topic.to_string(), schema);
    }

    pub fn response_schema(&self, topic: &str) -> Option<Schema> {
        self.responses.get(topic).map(|s| s.value().clone())
    }

    pub fn error_schema(&self, topic: &str) -> Option<Schema> {
        self.errors.get(topic).map(|s| s.value().clone())
    }

    /// 订阅侧取回 Schema；通配模式没有单一 Schema，返回 `Ok(None)`
    pub async fn resolve(&self, pattern: &str, version: Option<&str>) -> SaltResult<Option<Schema>> {
        if TopicPattern::new(pattern)?.has_wildcards() {
            return Ok(None);
        }
        let version = match version {
            Some(v) if !is_latest(Some(v)) => v,
            _ => LATEST,
        };
        let record = self.registry.get(pattern, version).await?;
        Ok(Some(Schema::from_document(record.schema())?))
    }

    fn record(&self, decl: &Declaration) -> SchemaRecord {
        SchemaRecord::builder()
            .topic(decl.topic())
            .version(decl.version())
            .schema(decl.schema().to_document())
            .mode(decl.mode())
            .maybe_response_schema(self.responses.get(decl.topic()).map(|s| s.to_document()))
            .maybe_error_schema(self.errors.get(decl.topic()).map(|s| s.to_document()))
            .publisher(decl.publisher().clone())
            .maybe_description(decl.description())
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemorySchemaRegistry;
    use crate::schema::FieldSpec;

    fn signup(extra: bool) -> Declaration {
        let mut fields = vec![FieldSpec::integer("user_id"), FieldSpec::string("email")];
        if extra {
            fields.push(FieldSpec::string("phone"));
        }
        Declaration::builder()
            .topic("user.signup.completed")
            .schema(Schema::new("UserSignup", fields).unwrap())
            .build()
    }

    fn setup() -> (Arc<InMemorySchemaRegistry>, SchemaBinder) {
        let registry = Arc::new(InMemorySchemaRegistry::new());
        let binder = SchemaBinder::new(registry.clone());
        (registry, binder)
    }

    #[tokio::test]
    async fn declare_registers_and_is_idempotent() {
        let (registry, binder) = setup();
        binder.declare(&signup(false)).await.unwrap();
        binder.declare(&signup(false)).await.unwrap();

        let record = registry.get("user.signup.completed", "v1").await.unwrap();
        assert_eq!(record.schema()["required"], serde_json::json!(["user_id", "email"]));
        assert_eq!(record.mode(), ExecutionMode::Broadcast);
    }

    #[tokio::test]
    async fn conflicting_declaration_fails() {
        let (_, binder) = setup();
        binder.declare(&signup(false)).await.unwrap();
        let err = binder.declare(&signup(true)).await.unwrap_err();
        assert!(matches!(err, SaltError::SchemaConflict { .. }));
    }

    #[tokio::test]
    async fn unavailable_registry_defers_registration() {
        let (registry, binder) = setup();
        registry.set_available(false);
        binder.declare(&signup(false)).await.unwrap();
        assert!(binder.pending().contains("user.signup.completed", "v1"));

        binder.ensure_registered("user.signup.completed", "v1").await.unwrap();
        assert_eq!(binder.pending().len(), 1);

        registry.set_available(true);
        binder.ensure_registered("user.signup.completed", "v1").await.unwrap();
        assert!(binder.pending().is_empty());
        assert!(registry.get("user.signup.completed", "v1").await.is_ok());
    }

    #[tokio::test]
    async fn flush_registers_all_pending() {
        let (registry, binder) = setup();
        registry.set_available(false);
        binder.declare(&signup(false)).await.unwrap();
        let other = Declaration::builder()
            .topic("order.created")
            .version("v2")
            .schema(Schema::new("Order", vec![FieldSpec::integer("id")]).unwrap())
            .build();
        binder.declare(&other).await.unwrap();
        assert_eq!(binder.flush_pending().await.unwrap(), 0);

        registry.set_available(true);
        assert_eq!(binder.flush_pending().await.unwrap(), 2);
        assert!(binder.pending().is_empty());
    }

    #[tokio::test]
    async fn response_schemas_are_attached_to_the_record() {
        let (registry, binder) = setup();
        binder.declare_response(
            "rpc.add",
            Schema::new("AddResponse", vec![FieldSpec::number("result")]).unwrap(),
        );
        let decl = Declaration::builder()
            .topic("rpc.add")
            .mode(ExecutionMode::Rpc)
            .schema(Schema::new("Add", vec![FieldSpec::number("a"), FieldSpec::number("b")]).unwrap())
            .build();
        binder.declare(&decl).await.unwrap();

        let record = registry.get("rpc.add", "latest").await.unwrap();
        assert_eq!(record.response_schema().unwrap()["title"], "AddResponse");
        assert!(record.error_schema().is_none());
        assert!(binder.response_schema("rpc.add").is_some());
    }

    #[tokio::test]
    async fn resolve_rebuilds_schema_from_registry() {
        let (_, binder) = setup();
        binder.declare(&signup(false)).await.unwrap();

        let schema = binder
            .resolve("user.signup.completed", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(schema.required_fields(), ["user_id", "email"]);

        assert!(binder.resolve("user.*", None).await.unwrap().is_none());
        assert!(matches!(
            binder.resolve("unknown.topic", Some("v1")).await,
            Err(SaltError::SchemaNotFound { .. })
        ));
    }
}
