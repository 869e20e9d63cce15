//! 广播执行（BroadcastExecutor）
//!
//! 广播路径下，分发器只负责把每个匹配处理器封装为独立作业并提交，不等待完成；
//! 作业的执行、重试与失败处理由执行器（外部协作方，如运行时的任务池）负责。
//!
use super::handler::{HandlerContext, HandlerError, HandlerResult};
use crate::error::SaltResult;
use crate::registry::HandlerRegistration;
use futures_util::FutureExt;
use serde_json::{Map, Value};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

/// 每个订阅的重试策略；退避时间按次数翻倍
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// 第 `attempt` 次失败后的等待时间（attempt 从 1 开始）
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.backoff.saturating_mul(1u32 << exp)
    }
}

/// 一个待执行的广播作业
#[derive(Debug, Clone)]
pub struct BroadcastJob {
    registration: Arc<HandlerRegistration>,
    ctx: HandlerContext,
    payload: Map<String, Value>,
}

impl BroadcastJob {
    pub fn new(
        registration: Arc<HandlerRegistration>,
        ctx: HandlerContext,
        payload: Map<String, Value>,
    ) -> Self {
        Self {
            registration,
            ctx,
            payload,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.ctx.task_id
    }

    pub fn handler_name(&self) -> &str {
        self.registration.name()
    }

    pub fn routing_key(&self) -> &str {
        &self.ctx.routing_key
    }

    pub fn retry(&self) -> &RetryPolicy {
        self.registration.retry()
    }

    /// 执行一次；处理器 panic 转换为普通失败
    pub async fn run(&self, attempt: u32) -> HandlerResult {
        let mut ctx = self.ctx.clone();
        ctx.attempt = attempt;
        let fut = self.registration.handler().handle(&ctx, self.payload.clone());
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(HandlerError::failed("handler panicked")),
        }
    }
}

pub trait BroadcastExecutor: Send + Sync {
    /// 提交作业，立即返回任务 ID
    fn submit(&self, job: BroadcastJob) -> SaltResult<String>;
}
