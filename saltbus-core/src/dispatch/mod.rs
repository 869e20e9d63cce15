//! 分发模块
//!
//! - `handler`：处理器签名、上下文与处理器错误；
//! - `executor`：广播作业与执行器协议、重试策略；
//! - `dispatcher`：入站消息的分发与报告。
//!
mod dispatcher;
mod executor;
mod handler;

pub use dispatcher::{
    DispatchOutcome, DispatchReport, DispatchStatus, Dispatcher, DispatcherConfig, ReportStatus,
};
pub use executor::{BroadcastExecutor, BroadcastJob, RetryPolicy};
pub use handler::{FnHandler, Handler, HandlerContext, HandlerError, HandlerResult, RpcError};
