//! saltbus 核心库（saltbus-core）
//!
//! 基于主题路由的消息分发内核，构建在通用消息中间件之上：
//! - 版本比较（`version`）：解析/比较版本标签，判断处理器与消息的版本兼容性
//! - 结构化 Schema（`schema`）：字段声明、JSON Schema 文档互转与逐字段校验
//! - Schema 注册表（`registry`）：按 (topic, version) 存储 Schema 并检测冲突
//! - 处理器注册表（`registry::HandlerRegistry`）：路由键/通配模式到处理器的映射
//! - 分发器（`dispatch`）：每条入站消息的唯一入口，区分 RPC 与广播执行
//! - 生产者（`producer`）：构建信封、发布消息、RPC 等待与结果解包
//! - 声明与订阅（`binder`、`hub`）：声明事件得到可发布句柄，订阅主题得到处理器注册
//!
//! 本 crate 不持有任何进程级全局状态；注册表与传输层均以依赖注入的方式传入，
//! 进程级默认实例由外层装配（如 `saltbus-runtime`）负责。
//!
pub mod binder;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod hub;
pub mod producer;
pub mod registry;
pub mod schema;
pub mod topic;
pub mod transport;
pub mod version;

pub use error::{SaltError, SaltResult};
pub use hub::EventHub;

// 供派生宏生成代码引用，避免下游 crate 额外依赖 serde_json
#[doc(hidden)]
pub use serde_json;

// 允许在本 crate 内部通过 ::saltbus_core 进行自引用，
// 以便派生宏在本 crate 的单元测试中也能解析到 ::saltbus_core 路径。
extern crate self as saltbus_core;
