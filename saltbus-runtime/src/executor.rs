//! 广播任务执行器（TaskExecutor）
//!
//! 每个广播作业在独立的 tokio 任务中运行，按订阅的重试策略重试：
//! - 第 n 次失败后等待 `backoff * 2^(n-1)`；
//! - 重试耗尽后记 error 并放弃（业务 `RpcError` 在广播路径下同样视为普通失败）；
//! - `close` 拒绝新作业并中止退避中的重试；`wait` 同样关闭入口，并等待已提交作业全部结束。
//!
use saltbus_core::dispatch::{BroadcastExecutor, BroadcastJob};
use saltbus_core::{SaltError, SaltResult};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

#[derive(Debug, Default)]
pub struct TaskExecutor {
    tracker: TaskTracker,
    token: CancellationToken,
}

impl TaskExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 正在执行（含退避等待中）的作业数
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// 拒绝新作业，并中止尚在退避等待中的重试
    pub fn close(&self) {
        self.tracker.close();
        self.token.cancel();
    }

    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    async fn run(job: BroadcastJob, token: CancellationToken) {
        let started = Instant::now();
        let max_retries = job.retry().max_retries;
        let mut attempt = 1;
        loop {
            match job.run(attempt).await {
                Ok(_) => {
                    tracing::debug!(
                        routing_key = job.routing_key(),
                        handler = job.handler_name(),
                        task_id = job.task_id(),
                        attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "broadcast handler completed"
                    );
                    return;
                }
                Err(err) if attempt <= max_retries => {
                    let delay = job.retry().delay_for(attempt);
                    tracing::warn!(
                        routing_key = job.routing_key(),
                        handler = job.handler_name(),
                        task_id = job.task_id(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "broadcast handler failed, retrying"
                    );
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(err) => {
                    tracing::error!(
                        routing_key = job.routing_key(),
                        handler = job.handler_name(),
                        task_id = job.task_id(),
                        attempt,
                        error = %err,
                        "broadcast handler failed"
                    );
                    return;
                }
            }
        }
    }
}

impl BroadcastExecutor for TaskExecutor {
    fn submit(&self, job: BroadcastJob) -> SaltResult<String> {
        if self.tracker.is_closed() {
            return Err(SaltError::HandlerFailed {
                handler: job.handler_name().to_string(),
                reason: "executor is closed".to_string(),
            });
        }
        let task_id = job.task_id().to_string();
        self.tracker.spawn(Self::run(job, self.token.clone()));
        Ok(task_id)
    }
}
