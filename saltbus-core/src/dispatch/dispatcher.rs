//! 分发器（Dispatcher）
//!
//! 每条入站消息的唯一入口，单次分发的状态流转：
//! `received → deserialized → handlers_resolved → {no_handlers | executing} → completed`
//!
//! - 执行模式由消息元数据一次性决定（`is_rpc`），而非逐处理器决定；
//! - RPC：按注册顺序在本次调用内逐个执行，收集每个处理器的结果；
//! - 广播：逐个提交给执行器，立即记录 `dispatched`；
//! - 单个处理器的失败只会变成该处理器的 `error` 结果，不会中断其他处理器；
//! - 反序列化/查找阶段的失败对本次分发是致命的，记录后上抛，交由传输层重投。
//!
//! 分发器自身无可变状态，可被多个工作者并发调用。
//!
use super::executor::{BroadcastExecutor, BroadcastJob};
use super::handler::{HandlerContext, HandlerError};
use crate::envelope::{Envelope, Meta};
use crate::error::{SaltError, SaltResult};
use crate::registry::{HandlerRegistration, HandlerRegistry};
use crate::transport::{InboundMessage, MessageConsumer};
use crate::version::is_compatible;
use async_trait::async_trait;
use bon::Builder;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

/// 报告级状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Completed,
    NoHandlers,
}

/// 单个处理器的结果状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Success,
    Error,
    Dispatched,
}

/// 单个处理器的分发结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub handler: String,
    pub status: DispatchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

/// 单条消息的分发报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub status: ReportStatus,
    pub routing_key: String,
    #[serde(default)]
    pub message_id: String,
    pub is_rpc: bool,
    pub handlers_executed: usize,
    #[serde(default)]
    pub results: Vec<DispatchOutcome>,
}

impl DispatchReport {
    fn no_handlers(message: &InboundMessage, is_rpc: bool) -> Self {
        Self {
            status: ReportStatus::NoHandlers,
            routing_key: message.routing_key.clone(),
            message_id: message.message_id.clone(),
            is_rpc,
            handlers_executed: 0,
            results: Vec::new(),
        }
    }

    pub fn error_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == DispatchStatus::Error)
            .count()
    }
}

/// 分发器配置
#[derive(Builder, Debug, Clone)]
pub struct DispatcherConfig {
    /// 分发入口名称（日志字段）
    #[builder(into, default = "saltbus.dispatch_event".to_string())]
    pub name: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Builder)]
pub struct Dispatcher {
    handlers: Arc<HandlerRegistry>,
    executor: Arc<dyn BroadcastExecutor>,
    #[builder(default)]
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    /// 分发一条入站消息
    pub async fn dispatch(&self, message: &InboundMessage) -> SaltResult<DispatchReport> {
        let started = Instant::now();
        let routing_key = message.routing_key.as_str();

        tracing::debug!(
            dispatcher = %self.config.name,
            routing_key,
            message_id = %message.message_id,
            delivery_attempt = message.delivery_attempt,
            "message received"
        );

        let envelope = Envelope::decode(&message.body).map_err(|e| {
            tracing::error!(
                routing_key,
                message_id = %message.message_id,
                error = %e,
                "failed to decode message"
            );
            SaltError::Dispatch {
                routing_key: routing_key.to_string(),
                reason: e.to_string(),
            }
        })?;

        let is_rpc = envelope.is_rpc();
        let (payload, meta) = envelope.into_parts();
        let message_version = meta.as_ref().and_then(Meta::version);

        let registrations = self.handlers.lookup(routing_key);
        if registrations.is_empty() {
            tracing::warn!(routing_key, message_id = %message.message_id, is_rpc, "no handlers");
            return Ok(DispatchReport::no_handlers(message, is_rpc));
        }

        let compatible: Vec<Arc<HandlerRegistration>> = registrations
            .into_iter()
            .filter(|r| is_compatible(r.version(), message_version))
            .collect();

        let results = if is_rpc {
            self.run_rpc(message, &compatible, &payload, meta.as_ref()).await
        } else {
            self.submit_broadcast(message, &compatible, &payload, meta.as_ref())
        };

        let report = DispatchReport {
            status: ReportStatus::Completed,
            routing_key: routing_key.to_string(),
            message_id: message.message_id.clone(),
            is_rpc,
            handlers_executed: results.len(),
            results,
        };

        let handler_errors = report.error_count();
        let elapsed_ms = started.elapsed().as_millis() as u64;
        if is_rpc && handler_errors > 0 {
            tracing::warn!(
                routing_key,
                message_id = %message.message_id,
                is_rpc,
                handlers_executed = report.handlers_executed,
                handler_errors,
                elapsed_ms,
                "dispatch completed"
            );
        } else {
            tracing::info!(
                routing_key,
                message_id = %message.message_id,
                is_rpc,
                handlers_executed = report.handlers_executed,
                handler_errors,
                elapsed_ms,
                "dispatch completed"
            );
        }
        Ok(report)
    }

    async fn run_rpc(
        &self,
        message: &InboundMessage,
        registrations: &[Arc<HandlerRegistration>],
        payload: &Map<String, Value>,
        meta: Option<&Meta>,
    ) -> Vec<DispatchOutcome> {
        let mut outcomes = Vec::with_capacity(registrations.len());
        for registration in registrations {
            let ctx = context(message, registration, meta, true);
            tracing::debug!(
                routing_key = %message.routing_key,
                handler = registration.name(),
                task_id = %ctx.task_id,
                "invoking rpc handler"
            );

            let fut = registration.handler().handle(&ctx, payload.clone());
            let result = match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(HandlerError::failed("handler panicked")),
            };

            let handler = registration.name().to_string();
            let outcome = match result {
                Ok(value) => DispatchOutcome {
                    handler,
                    status: DispatchStatus::Success,
                    result: Some(value.unwrap_or(Value::Null)),
                    error: None,
                    task_id: Some(ctx.task_id),
                },
                Err(HandlerError::Rpc(rpc)) => {
                    tracing::debug!(
                        routing_key = %message.routing_key,
                        handler = %handler,
                        error_code = %rpc.code,
                        "rpc handler rejected request"
                    );
                    DispatchOutcome {
                        handler,
                        status: DispatchStatus::Error,
                        result: Some(Value::Object(rpc.to_payload())),
                        error: Some(rpc.to_string()),
                        task_id: Some(ctx.task_id),
                    }
                }
                Err(err) => {
                    tracing::error!(
                        routing_key = %message.routing_key,
                        message_id = %message.message_id,
                        handler = %handler,
                        error = %err,
                        "rpc handler failed"
                    );
                    DispatchOutcome {
                        handler,
                        status: DispatchStatus::Error,
                        result: None,
                        error: Some(err.to_string()),
                        task_id: Some(ctx.task_id),
                    }
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    fn submit_broadcast(
        &self,
        message: &InboundMessage,
        registrations: &[Arc<HandlerRegistration>],
        payload: &Map<String, Value>,
        meta: Option<&Meta>,
    ) -> Vec<DispatchOutcome> {
        registrations
            .iter()
            .map(|registration| {
                let ctx = context(message, registration, meta, false);
                let handler = registration.name().to_string();
                let job = BroadcastJob::new(registration.clone(), ctx, payload.clone());

                match self.executor.submit(job) {
                    Ok(task_id) => {
                        tracing::debug!(
                            routing_key = %message.routing_key,
                            handler = %handler,
                            task_id = %task_id,
                            "handler dispatched"
                        );
                        DispatchOutcome {
                            handler,
                            status: DispatchStatus::Dispatched,
                            result: None,
                            error: None,
                            task_id: Some(task_id),
                        }
                    }
                    Err(err) => {
                        tracing::error!(
                            routing_key = %message.routing_key,
                            handler = %handler,
                            error = %err,
                            "failed to submit broadcast handler"
                        );
                        DispatchOutcome {
                            handler,
                            status: DispatchStatus::Error,
                            result: None,
                            error: Some(err.to_string()),
                            task_id: None,
                        }
                    }
                }
            })
            .collect()
    }
}

fn context(
    message: &InboundMessage,
    registration: &HandlerRegistration,
    meta: Option<&Meta>,
    is_rpc: bool,
) -> HandlerContext {
    let task_id = if is_rpc {
        format!("{}:rpc:{}", message.message_id, registration.id())
    } else {
        format!("{}:{}", message.message_id, registration.id())
    };
    HandlerContext {
        message_id: message.message_id.clone(),
        routing_key: message.routing_key.clone(),
        handler_id: registration.id(),
        handler_name: registration.name().to_string(),
        task_id,
        is_rpc,
        meta: meta.cloned(),
        attempt: 1,
    }
}

#[async_trait]
impl MessageConsumer for Dispatcher {
    async fn consume(&self, message: &InboundMessage) -> SaltResult<DispatchReport> {
        self.dispatch(message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{FnHandler, Handler, RpcError};
    use crate::registry::HandlerMetadata;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingExecutor {
        jobs: Mutex<Vec<BroadcastJob>>,
    }

    impl BroadcastExecutor for RecordingExecutor {
        fn submit(&self, job: BroadcastJob) -> SaltResult<String> {
            let id = job.task_id().to_string();
            self.jobs.lock().unwrap().push(job);
            Ok(id)
        }
    }

    fn handler<F>(name: &str, f: F) -> Arc<dyn Handler>
    where
        F: Fn(Map<String, Value>) -> Result<Option<Value>, HandlerError> + Send + Sync + Clone + 'static,
    {
        Arc::new(FnHandler::new(name, move |_ctx: HandlerContext, p: Map<String, Value>| {
            let f = f.clone();
            async move { f(p) }
        }))
    }

    fn setup() -> (Arc<HandlerRegistry>, Arc<RecordingExecutor>, Dispatcher) {
        let registry = Arc::new(HandlerRegistry::new());
        let executor = Arc::new(RecordingExecutor::default());
        let dispatcher = Dispatcher::builder()
            .handlers(registry.clone())
            .executor(executor.clone())
            .build();
        (registry, executor, dispatcher)
    }

    fn message(routing_key: &str, body: Value) -> InboundMessage {
        InboundMessage::new(routing_key, "msg-1", body.to_string())
    }

    #[tokio::test]
    async fn no_handlers_is_an_outcome_not_an_error() {
        let (_, _, dispatcher) = setup();
        let report = dispatcher
            .dispatch(&message("nobody.listens", json!({"_meta": {"is_rpc": true}})))
            .await
            .unwrap();
        assert_eq!(report.status, ReportStatus::NoHandlers);
        assert_eq!(report.handlers_executed, 0);
        assert!(report.is_rpc);
    }

    #[tokio::test]
    async fn rpc_business_error_becomes_structured_outcome() {
        let (registry, executor, dispatcher) = setup();
        registry
            .register(
                "rpc.users.get",
                handler("get", |_| Err(RpcError::new("NOT_FOUND", "no such user").into())),
                HandlerMetadata::default(),
            )
            .unwrap();

        let rpc = dispatcher
            .dispatch(&message("rpc.users.get", json!({"id": 1, "_meta": {"is_rpc": true}})))
            .await
            .unwrap();
        let first = &rpc.results[0];
        assert_eq!(first.status, DispatchStatus::Error);
        assert_eq!(first.result.as_ref().unwrap()["error_code"], "NOT_FOUND");
        assert_eq!(first.result.as_ref().unwrap()["error_message"], "no such user");

        let broadcast = dispatcher
            .dispatch(&message("rpc.users.get", json!({"id": 1, "_meta": {"is_rpc": false}})))
            .await
            .unwrap();
        assert_eq!(broadcast.results[0].status, DispatchStatus::Dispatched);
        assert!(broadcast.results[0].error.is_none());
        assert_eq!(executor.jobs.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rpc_runs_all_handlers_in_registration_order_and_survives_failures() {
        let (registry, _, dispatcher) = setup();
        registry
            .register("rpc.add", handler("crash", |_| Err(HandlerError::failed("db down"))), HandlerMetadata::default())
            .unwrap();
        registry
            .register(
                "rpc.add",
                handler("add", |p| {
                    let sum = p["a"].as_f64().unwrap_or(0.0) + p["b"].as_f64().unwrap_or(0.0);
                    Ok(Some(json!({ "result": sum })))
                }),
                HandlerMetadata::default(),
            )
            .unwrap();
        registry
            .register("rpc.#", handler("panics", |_| panic!("boom")), HandlerMetadata::default())
            .unwrap();

        let report = dispatcher
            .dispatch(&message("rpc.add", json!({"a": 10, "b": 32})))
            .await
            .unwrap();

        assert!(report.is_rpc, "messages without metadata default to rpc");
        assert_eq!(report.handlers_executed, 3);
        let statuses: Vec<DispatchStatus> = report.results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            [DispatchStatus::Error, DispatchStatus::Success, DispatchStatus::Error]
        );
        assert!(report.results[0].result.is_none());
        assert_eq!(report.results[1].result, Some(json!({"result": 42.0})));
        assert!(report.results[1].task_id.as_deref().unwrap().starts_with("msg-1:rpc:"));
        assert_eq!(report.error_count(), 2);
    }

    #[tokio::test]
    async fn incompatible_versions_are_skipped() {
        let (registry, executor, dispatcher) = setup();
        let versioned = |v: &str| HandlerMetadata {
            version: Some(v.to_string()),
            ..Default::default()
        };
        registry.register("x", handler("v1", |_| Ok(None)), versioned("v1")).unwrap();
        registry.register("x", handler("v3", |_| Ok(None)), versioned("v3")).unwrap();
        registry.register("x", handler("any", |_| Ok(None)), HandlerMetadata::default()).unwrap();

        let report = dispatcher
            .dispatch(&message("x", json!({"_meta": {"is_rpc": false, "version": "v2"}})))
            .await
            .unwrap();
        let names: Vec<&str> = report.results.iter().map(|r| r.handler.as_str()).collect();
        assert_eq!(names, ["saltbus.x.v1", "saltbus.x.any"]);

        let jobs = executor.jobs.lock().unwrap();
        assert!(jobs[0].task_id().starts_with("msg-1:"));
        assert!(!jobs[0].task_id().contains(":rpc:"));
    }

    #[tokio::test]
    async fn metadata_is_stripped_before_handlers_run() {
        let (registry, _, dispatcher) = setup();
        registry
            .register("t", handler("echo", |p| Ok(Some(Value::Object(p)))), HandlerMetadata::default())
            .unwrap();
        let report = dispatcher
            .dispatch(&message("t", json!({"k": 1, "_tchu_meta": {"is_rpc": true}})))
            .await
            .unwrap();
        assert_eq!(report.results[0].result, Some(json!({"k": 1})));
    }

    #[tokio::test]
    async fn undecodable_messages_fail_the_dispatch() {
        let (_, _, dispatcher) = setup();
        let err = dispatcher
            .dispatch(&InboundMessage::new("t", "m", "not json"))
            .await
            .unwrap_err();
        assert!(matches!(err, SaltError::Dispatch { .. }));
    }

    #[test]
    fn report_serializes_with_wire_names() {
        let report = DispatchReport {
            status: ReportStatus::NoHandlers,
            routing_key: "a.b".into(),
            message_id: "m".into(),
            is_rpc: true,
            handlers_executed: 0,
            results: vec![],
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["status"], "no_handlers");
        let back: DispatchReport = serde_json::from_value(value).unwrap();
        assert_eq!(back, report);
    }
}
