//! 声明句柄（EventHandle / RpcHandle）
//!
//! 句柄绑定了声明的 Schema：发布/调用前先校验（失败即返回，不会交给传输层），
//! 再补注册可能暂存的 Schema，最后交给生产者。消息缺省携带声明版本。
//!
use super::{Declaration, SchemaBinder};
use crate::error::{SaltError, SaltResult};
use crate::producer::{Producer, PublishOptions, RpcResponse, unwrap_rpc_report};
use serde::Serialize;
use serde_json::{Map, Value};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

struct Bound {
    decl: Arc<Declaration>,
    binder: Arc<SchemaBinder>,
    producer: Arc<Producer>,
}

impl Bound {
    fn validate<T: Serialize + ?Sized>(&self, payload: &T) -> SaltResult<Map<String, Value>> {
        let value = serde_json::to_value(payload)?;
        self.decl.schema().validate(&value).map_err(|errors| {
            tracing::warn!(
                topic = self.decl.topic(),
                version = self.decl.version(),
                errors = %errors.summary(),
                "payload validation failed"
            );
            SaltError::Validation(errors)
        })
    }

    async fn prepare<T: Serialize + ?Sized>(
        &self,
        payload: &T,
        mut opts: PublishOptions,
    ) -> SaltResult<(Map<String, Value>, PublishOptions)> {
        let validated = self.validate(payload)?;
        self.binder
            .ensure_registered(self.decl.topic(), self.decl.version())
            .await?;
        if opts.version.is_none() {
            opts.version = Some(self.decl.version().to_string());
        }
        Ok((validated, opts))
    }
}

/// 广播事件句柄
pub struct EventHandle<T: ?Sized> {
    bound: Bound,
    _payload: PhantomData<fn(&T)>,
}

impl<T: Serialize + ?Sized> EventHandle<T> {
    pub(crate) fn new(decl: Arc<Declaration>, binder: Arc<SchemaBinder>, producer: Arc<Producer>) -> Self {
        Self {
            bound: Bound { decl, binder, producer },
            _payload: PhantomData,
        }
    }

    pub fn declaration(&self) -> &Declaration {
        &self.bound.decl
    }

    pub fn topic(&self) -> &str {
        self.bound.decl.topic()
    }

    pub fn version(&self) -> &str {
        self.bound.decl.version()
    }

    /// 仅校验，返回规整后的对象
    pub fn validate(&self, payload: &T) -> SaltResult<Map<String, Value>> {
        self.bound.validate(payload)
    }

    pub async fn publish(&self, payload: &T) -> SaltResult<String> {
        self.publish_with(payload, PublishOptions::default()).await
    }

    pub async fn publish_with(&self, payload: &T, opts: PublishOptions) -> SaltResult<String> {
        let (validated, opts) = self.bound.prepare(payload, opts).await?;
        self.bound
            .producer
            .publish(self.topic(), validated, &opts)
            .await
    }
}

/// RPC 句柄
pub struct RpcHandle<T: ?Sized> {
    bound: Bound,
    _payload: PhantomData<fn(&T)>,
}

impl<T: Serialize + ?Sized> RpcHandle<T> {
    pub(crate) fn new(decl: Arc<Declaration>, binder: Arc<SchemaBinder>, producer: Arc<Producer>) -> Self {
        Self {
            bound: Bound { decl, binder, producer },
            _payload: PhantomData,
        }
    }

    pub fn declaration(&self) -> &Declaration {
        &self.bound.decl
    }

    pub fn topic(&self) -> &str {
        self.bound.decl.topic()
    }

    pub fn version(&self) -> &str {
        self.bound.decl.version()
    }

    pub fn validate(&self, payload: &T) -> SaltResult<Map<String, Value>> {
        self.bound.validate(payload)
    }

    /// 发起调用；`timeout` 为空时使用生产者默认超时
    pub async fn call(&self, payload: &T, timeout: Option<Duration>) -> SaltResult<RpcResponse> {
        self.call_with(payload, timeout, PublishOptions::default()).await
    }

    pub async fn call_with(
        &self,
        payload: &T,
        timeout: Option<Duration>,
        opts: PublishOptions,
    ) -> SaltResult<RpcResponse> {
        let (validated, opts) = self.bound.prepare(payload, opts).await?;
        let topic = self.topic();
        let report = self
            .bound
            .producer
            .call(topic, validated, timeout, &opts)
            .await?;

        let binder = &self.bound.binder;
        unwrap_rpc_report(
            topic,
            report,
            binder.response_schema(topic).as_ref(),
            binder.error_schema(topic).as_ref(),
        )
    }
}
