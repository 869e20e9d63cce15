//! saltbus 运行时（saltbus-runtime）
//!
//! 核心库之上的最外层装配：
//! - `Salt`：按 `SaltConfig` 装配注册表、分发器、生产者与进程内代理，提供声明/订阅/启动入口；
//! - `InMemoryBroker`：进程内主题代理，实现 `Transport`（工作池、RPC 结果后端、重投）；
//! - `TaskExecutor`：广播作业执行器，按订阅重试策略重试；
//! - `SaltClient`：不经声明句柄的发布/调用客户端；
//! - `telemetry::init_tracing`：日志初始化，仅供二进制入口调用。
//!
pub mod broker;
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod salt;
pub mod telemetry;

pub use broker::{BrokerConfig, InMemoryBroker};
pub use client::SaltClient;
pub use config::SaltConfig;
pub use error::{ConfigError, RuntimeError, RuntimeResult};
pub use executor::TaskExecutor;
pub use salt::{Salt, WorkerHandle};

pub use saltbus_core::hub::{DeclareOptions, SubscribeOptions};
pub use saltbus_core::producer::{PublishOptions, RpcResponse};
