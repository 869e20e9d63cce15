//! 无声明客户端（SaltClient）
//!
//! 不经过声明句柄直接发布/调用任意主题：
//! - 载荷不做请求侧校验；非对象值包装为 `{"data": value}`；
//! - 调用结果按主题已声明的响应/错误 Schema 解包；
//! - 成功结果中带 `error_code` / `error_message` 的载荷视为业务错误。
//!
use saltbus_core::SaltResult;
use saltbus_core::binder::SchemaBinder;
use saltbus_core::dispatch::{DispatchStatus, RpcError};
use saltbus_core::producer::{Producer, PublishOptions, RpcResponse, unwrap_rpc_report};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct SaltClient {
    producer: Arc<Producer>,
    binder: Arc<SchemaBinder>,
}

impl SaltClient {
    pub fn new(producer: Arc<Producer>, binder: Arc<SchemaBinder>) -> Self {
        Self { producer, binder }
    }

    pub async fn publish<P: Serialize + ?Sized>(
        &self,
        topic: &str,
        payload: &P,
        opts: PublishOptions,
    ) -> SaltResult<String> {
        let payload = to_object(serde_json::to_value(payload)?);
        self.producer.publish(topic, payload, &opts).await
    }

    pub async fn call<P: Serialize + ?Sized>(
        &self,
        topic: &str,
        payload: &P,
        timeout: Option<Duration>,
        opts: PublishOptions,
    ) -> SaltResult<RpcResponse> {
        let payload = to_object(serde_json::to_value(payload)?);
        let report = self.producer.call(topic, payload, timeout, &opts).await?;
        let response = unwrap_rpc_report(
            topic,
            report,
            self.binder.response_schema(topic).as_ref(),
            self.binder.error_schema(topic).as_ref(),
        )?;
        Ok(reclassify(response))
    }
}

fn to_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => Map::from_iter([("data".to_string(), other)]),
    }
}

fn reclassify(response: RpcResponse) -> RpcResponse {
    match response {
        RpcResponse::Success(map) if RpcError::is_error_payload(&map) => RpcResponse::Error(map),
        RpcResponse::Raw {
            status: DispatchStatus::Success,
            payload: Value::Object(map),
        } if RpcError::is_error_payload(&map) => RpcResponse::Raw {
            status: DispatchStatus::Error,
            payload: Value::Object(map),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars_are_wrapped() {
        assert_eq!(Value::Object(to_object(json!(5))), json!({"data": 5}));
        assert_eq!(Value::Object(to_object(json!({"a": 1}))), json!({"a": 1}));
    }

    #[test]
    fn error_shaped_success_becomes_error() {
        let map = to_object(json!({"error_code": "E1", "error_message": "bad"}));
        assert!(!reclassify(RpcResponse::Success(map)).is_success());

        let ok = to_object(json!({"result": 1}));
        assert!(reclassify(RpcResponse::Success(ok)).is_success());
    }
}
