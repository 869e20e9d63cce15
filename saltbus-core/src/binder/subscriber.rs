//! 订阅侧包装（ValidatingHandler / TypedHandler）
//!
//! `ValidatingHandler` 在调用用户处理器前按订阅版本的 Schema 校验载荷（多余字段被丢弃），
//! RPC 路径下再把返回值按主题的响应 Schema、业务错误按错误 Schema 规整；不匹配时记 warn 并原样返回。
//! 订阅时若 Schema 尚未注册，则在后续消息到达时惰性重试取回。
//!
//! `TypedHandler` 把已校验的对象反序列化为 `T` 再交给闭包，返回值序列化为响应载荷。
//!
use super::SchemaBinder;
use crate::dispatch::{Handler, HandlerContext, HandlerError, HandlerResult, RpcError};
use crate::schema::Schema;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};

pub struct ValidatingHandler {
    topic: String,
    version: Option<String>,
    inner: Arc<dyn Handler>,
    binder: Arc<SchemaBinder>,
    schema: OnceLock<Schema>,
    lazy: bool,
}

impl ValidatingHandler {
    /// `schema` 为空且 `lazy` 为真时，每条消息都会尝试重新取回 Schema
    pub fn new(
        topic: impl Into<String>,
        version: Option<String>,
        inner: Arc<dyn Handler>,
        binder: Arc<SchemaBinder>,
        schema: Option<Schema>,
        lazy: bool,
    ) -> Self {
        let cell = OnceLock::new();
        if let Some(schema) = schema {
            let _ = cell.set(schema);
        }
        Self {
            topic: topic.into(),
            version,
            inner,
            binder,
            schema: cell,
            lazy,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    async fn schema(&self) -> Option<&Schema> {
        if let Some(schema) = self.schema.get() {
            return Some(schema);
        }
        if !self.lazy {
            return None;
        }
        match self.binder.resolve(&self.topic, self.version.as_deref()).await {
            Ok(Some(schema)) => {
                tracing::debug!(topic = %self.topic, "subscriber schema resolved");
                let _ = self.schema.set(schema);
                self.schema.get()
            }
            Ok(None) => None,
            Err(err) => {
                tracing::debug!(topic = %self.topic, error = %err, "subscriber schema still unavailable");
                None
            }
        }
    }

    fn shape_response(&self, ctx: &HandlerContext, value: Value) -> Value {
        let Some(schema) = self.binder.response_schema(&self.topic) else {
            return value;
        };
        match schema.validate(&value) {
            Ok(validated) => Value::Object(validated),
            Err(errors) => {
                tracing::warn!(
                    topic = %self.topic,
                    handler = %ctx.handler_name,
                    errors = %errors.summary(),
                    "response does not match declared schema, returning raw response"
                );
                value
            }
        }
    }

    fn shape_error(&self, ctx: &HandlerContext, rpc: RpcError) -> RpcError {
        let Some(schema) = self.binder.error_schema(&self.topic) else {
            return rpc;
        };
        match schema.validate_map(&rpc.to_payload()) {
            Ok(shaped) => rpc.reshape(shaped),
            Err(errors) => {
                tracing::warn!(
                    topic = %self.topic,
                    handler = %ctx.handler_name,
                    errors = %errors.summary(),
                    "error payload does not match declared error schema, returning raw error"
                );
                rpc
            }
        }
    }
}

#[async_trait]
impl Handler for ValidatingHandler {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn handle(&self, ctx: &HandlerContext, payload: Map<String, Value>) -> HandlerResult {
        let payload = match self.schema().await {
            Some(schema) => schema.validate_map(&payload).map_err(|errors| {
                tracing::error!(
                    topic = %self.topic,
                    routing_key = %ctx.routing_key,
                    handler = %ctx.handler_name,
                    errors = %errors.summary(),
                    "payload validation failed"
                );
                HandlerError::Validation(errors)
            })?,
            None => payload,
        };

        let result = self.inner.handle(ctx, payload).await;
        if !ctx.is_rpc {
            return result;
        }
        match result {
            Ok(Some(value)) => Ok(Some(self.shape_response(ctx, value))),
            Err(HandlerError::Rpc(rpc)) => Err(HandlerError::Rpc(self.shape_error(ctx, rpc))),
            other => other,
        }
    }
}

/// 类型化处理器：`Fn(HandlerContext, T) -> Future<Output = Result<R, HandlerError>>`
pub struct TypedHandler<T, R, F> {
    name: String,
    f: F,
    _types: PhantomData<fn(T) -> R>,
}

impl<T, R, F> TypedHandler<T, R, F> {
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
            _types: PhantomData,
        }
    }
}

#[async_trait]
impl<T, R, F, Fut> Handler for TypedHandler<T, R, F>
where
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    F: Fn(HandlerContext, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, ctx: &HandlerContext, payload: Map<String, Value>) -> HandlerResult {
        let typed: T = serde_json::from_value(Value::Object(payload))
            .map_err(|e| HandlerError::failed(format!("payload does not fit handler type: {e}")))?;
        let response = (self.f)(ctx.clone(), typed).await?;
        let value = serde_json::to_value(response)
            .map_err(|e| HandlerError::failed(format!("response is not serializable: {e}")))?;
        Ok((!value.is_null()).then_some(value))
    }
}
