//! 生产者与 RPC 客户端（Producer）
//!
//! - `publish`：构建信封（`is_rpc = false`）、生成消息 ID 并交给传输层，不等待投递确认；
//! - `call`：构建信封（`is_rpc = true`），经传输层同步路径发送并等待关联结果，
//!   超时返回 `SaltError::Timeout`，其余传输失败统一为 `SaltError::Publish`；
//! - `unwrap_rpc_report`：把分发报告解包为 `RpcResponse`。
//!
//! 业务级错误（处理器拒绝请求）作为值返回，传输/协议失败（超时、无处理器、序列化失败）
//! 作为错误返回；调用方如需把业务错误也当作错误处理，使用 `RpcResponse::into_success`。
//!
use crate::dispatch::{DispatchReport, DispatchStatus, ReportStatus, RpcError};
use crate::envelope::{Envelope, Meta};
use crate::error::{SaltError, SaltResult};
use crate::schema::Schema;
use crate::transport::{Transport, TransportError};
use bon::Builder;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// 发布选项
#[derive(Builder, Debug, Clone, Default)]
pub struct PublishOptions {
    /// 消息携带的版本；缺省时由声明句柄填入声明版本
    #[builder(into)]
    pub version: Option<String>,
    #[builder(into)]
    pub correlation_id: Option<String>,
    /// 链路追踪字段（如 `traceparent`）
    #[builder(default)]
    pub trace: BTreeMap<String, Value>,
}

/// 生产者配置
#[derive(Builder, Debug, Clone)]
pub struct ProducerConfig {
    /// `call` 未指定超时时使用
    #[builder(default = Duration::from_secs(30))]
    pub default_timeout: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Builder)]
pub struct Producer {
    transport: Arc<dyn Transport>,
    #[builder(default)]
    config: ProducerConfig,
}

impl Producer {
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn default_timeout(&self) -> Duration {
        self.config.default_timeout
    }

    /// 广播发布，返回消息 ID
    pub async fn publish(
        &self,
        topic: &str,
        payload: Map<String, Value>,
        opts: &PublishOptions,
    ) -> SaltResult<String> {
        let message_id = Uuid::new_v4().to_string();
        let body = Envelope::new(payload, meta(false, opts)).encode()?;

        self.transport
            .send(topic, body, &message_id)
            .await
            .map_err(|e| {
                tracing::error!(topic, message_id = %message_id, error = %e, "publish failed");
                SaltError::publish(e.to_string())
            })?;

        tracing::info!(
            topic,
            message_id = %message_id,
            version = opts.version.as_deref(),
            correlation_id = opts.correlation_id.as_deref(),
            "message published"
        );
        Ok(message_id)
    }

    /// RPC 调用，阻塞直至收到关联结果或超时
    pub async fn call(
        &self,
        topic: &str,
        payload: Map<String, Value>,
        timeout: Option<Duration>,
        opts: &PublishOptions,
    ) -> SaltResult<DispatchReport> {
        let timeout = timeout.unwrap_or(self.config.default_timeout);
        let message_id = Uuid::new_v4().to_string();
        let body = Envelope::new(payload, meta(true, opts)).encode()?;
        let started = Instant::now();

        let raw = self
            .transport
            .send_and_wait(topic, body, &message_id, timeout)
            .await
            .map_err(|e| match e {
                TransportError::Timeout { .. } => {
                    tracing::warn!(topic, message_id = %message_id, ?timeout, "rpc timed out");
                    SaltError::Timeout {
                        topic: topic.to_string(),
                        timeout,
                    }
                }
                other => {
                    tracing::error!(topic, message_id = %message_id, error = %other, "rpc call failed");
                    SaltError::publish(other.to_string())
                }
            })?;

        let report: DispatchReport = serde_json::from_str(&raw)?;
        tracing::info!(
            topic,
            message_id = %message_id,
            handlers_executed = report.handlers_executed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "rpc completed"
        );
        Ok(report)
    }
}

fn meta(is_rpc: bool, opts: &PublishOptions) -> Meta {
    Meta::builder()
        .is_rpc(is_rpc)
        .maybe_version(opts.version.clone())
        .maybe_correlation_id(opts.correlation_id.clone())
        .trace(opts.trace.clone())
        .build()
}

/// RPC 调用结果
#[derive(Debug, Clone, PartialEq)]
pub enum RpcResponse {
    /// 通过响应 Schema 校验（或未声明响应 Schema）的成功载荷
    Success(Map<String, Value>),
    /// 业务错误载荷
    Error(Map<String, Value>),
    /// 未通过 Schema 校验或非对象的原始载荷
    Raw { status: DispatchStatus, payload: Value },
}

impl RpcResponse {
    pub fn is_success(&self) -> bool {
        match self {
            RpcResponse::Success(_) => true,
            RpcResponse::Error(_) => false,
            RpcResponse::Raw { status, .. } => *status == DispatchStatus::Success,
        }
    }

    /// 载荷（成功或错误）
    pub fn payload(&self) -> Value {
        match self {
            RpcResponse::Success(m) | RpcResponse::Error(m) => Value::Object(m.clone()),
            RpcResponse::Raw { payload, .. } => payload.clone(),
        }
    }

    /// 业务错误转为 `SaltError::Rpc`，成功载荷反序列化为 `R`
    pub fn into_success<R: DeserializeOwned>(self) -> SaltResult<R> {
        match self {
            RpcResponse::Success(m) => Ok(serde_json::from_value(Value::Object(m))?),
            RpcResponse::Raw {
                status: DispatchStatus::Success,
                payload,
            } => Ok(serde_json::from_value(payload)?),
            RpcResponse::Error(m) => Err(SaltError::Rpc(RpcError::from_payload(&m))),
            RpcResponse::Raw { payload, .. } => {
                let map = match payload {
                    Value::Object(m) => m,
                    other => Map::from_iter([("error_message".to_string(), Value::String(other.to_string()))]),
                };
                Err(SaltError::Rpc(RpcError::from_payload(&map)))
            }
        }
    }
}

/// 解包分发报告：取第一个成功结果，否则取第一个错误结果
pub fn unwrap_rpc_report(
    topic: &str,
    report: DispatchReport,
    response_schema: Option<&Schema>,
    error_schema: Option<&Schema>,
) -> SaltResult<RpcResponse> {
    if report.status == ReportStatus::NoHandlers {
        return Err(SaltError::NoHandlers {
            topic: topic.to_string(),
        });
    }

    let chosen = report
        .results
        .iter()
        .position(|r| r.status == DispatchStatus::Success)
        .or_else(|| {
            report
                .results
                .iter()
                .position(|r| r.status == DispatchStatus::Error)
        });
    let Some(index) = chosen else {
        return Err(SaltError::EmptyResponse {
            topic: topic.to_string(),
        });
    };
    let outcome = report.results.into_iter().nth(index).ok_or_else(|| SaltError::EmptyResponse {
        topic: topic.to_string(),
    })?;

    match outcome.status {
        DispatchStatus::Success => Ok(shape(
            topic,
            DispatchStatus::Success,
            outcome.result.unwrap_or(Value::Null),
            response_schema,
        )),
        _ => match outcome.result {
            Some(payload) => Ok(shape(topic, DispatchStatus::Error, payload, error_schema)),
            None => Err(SaltError::HandlerFailed {
                handler: outcome.handler,
                reason: outcome.error.unwrap_or_else(|| "unknown error".to_string()),
            }),
        },
    }
}

fn shape(topic: &str, status: DispatchStatus, payload: Value, schema: Option<&Schema>) -> RpcResponse {
    let wrap = |m: Map<String, Value>| match status {
        DispatchStatus::Success => RpcResponse::Success(m),
        _ => RpcResponse::Error(m),
    };

    match (schema, payload) {
        (Some(schema), payload) => match schema.validate(&payload) {
            Ok(validated) => wrap(validated),
            Err(errors) => {
                tracing::warn!(
                    topic,
                    ?status,
                    errors = %errors.summary(),
                    "rpc payload does not match declared schema, returning raw payload"
                );
                RpcResponse::Raw { status, payload }
            }
        },
        (None, Value::Object(m)) => wrap(m),
        (None, payload) => RpcResponse::Raw { status, payload },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatchOutcome;
    use crate::schema::FieldSpec;
    use serde::Deserialize;
    use serde_json::json;

    fn report(results: Vec<DispatchOutcome>) -> DispatchReport {
        DispatchReport {
            status: ReportStatus::Completed,
            routing_key: "rpc.add".into(),
            message_id: "m".into(),
            is_rpc: true,
            handlers_executed: results.len(),
            results,
        }
    }

    fn outcome(status: DispatchStatus, result: Option<Value>, error: Option<&str>) -> DispatchOutcome {
        DispatchOutcome {
            handler: "h".into(),
            status,
            result,
            error: error.map(str::to_string),
            task_id: None,
        }
    }

    fn add_response() -> Schema {
        Schema::new("AddResponse", vec![FieldSpec::number("result")]).unwrap()
    }

    #[test]
    fn first_success_wins_over_earlier_errors() {
        let r = report(vec![
            outcome(DispatchStatus::Error, None, Some("boom")),
            outcome(DispatchStatus::Success, Some(json!({"result": 42.0})), None),
        ]);
        let response = unwrap_rpc_report("rpc.add", r, Some(&add_response()), None).unwrap();
        assert_eq!(response, RpcResponse::Success(json!({"result": 42.0}).as_object().cloned().unwrap()));

        #[derive(Deserialize)]
        struct Add {
            result: f64,
        }
        assert_eq!(response.into_success::<Add>().unwrap().result, 42.0);
    }

    #[test]
    fn response_schema_mismatch_degrades_to_raw() {
        let r = report(vec![outcome(DispatchStatus::Success, Some(json!({"total": "x"})), None)]);
        let response = unwrap_rpc_report("rpc.add", r, Some(&add_response()), None).unwrap();
        assert!(matches!(response, RpcResponse::Raw { status: DispatchStatus::Success, .. }));
        assert!(response.is_success());
    }

    #[test]
    fn business_errors_are_values() {
        let payload = RpcError::new("NEGATIVE", "operands must be positive").to_payload();
        let r = report(vec![outcome(DispatchStatus::Error, Some(Value::Object(payload.clone())), Some("x"))]);
        let response = unwrap_rpc_report("rpc.add", r, None, None).unwrap();
        assert_eq!(response, RpcResponse::Error(payload));

        let err = response.into_success::<Value>().unwrap_err();
        assert!(matches!(err, SaltError::Rpc(ref e) if e.code == "NEGATIVE"));
    }

    #[test]
    fn crashed_handler_and_empty_reports_are_errors() {
        let r = report(vec![outcome(DispatchStatus::Error, None, Some("db down"))]);
        assert!(matches!(
            unwrap_rpc_report("rpc.add", r, None, None),
            Err(SaltError::HandlerFailed { ref reason, .. }) if reason == "db down"
        ));

        assert!(matches!(
            unwrap_rpc_report("rpc.add", report(vec![]), None, None),
            Err(SaltError::EmptyResponse { .. })
        ));

        let mut none = report(vec![]);
        none.status = ReportStatus::NoHandlers;
        assert!(matches!(
            unwrap_rpc_report("rpc.add", none, None, None),
            Err(SaltError::NoHandlers { ref topic }) if topic == "rpc.add"
        ));
    }

    #[test]
    fn non_object_success_is_raw() {
        let r = report(vec![outcome(DispatchStatus::Success, Some(json!(5)), None)]);
        let response = unwrap_rpc_report("rpc.add", r, None, None).unwrap();
        assert_eq!(response, RpcResponse::Raw { status: DispatchStatus::Success, payload: json!(5) });
        assert_eq!(response.into_success::<i64>().unwrap(), 5);
    }
}
