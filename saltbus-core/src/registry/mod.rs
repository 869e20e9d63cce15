//! 注册表模块
//!
//! - `SchemaRegistry`：按 (topic, version) 存储 Schema 的协议与内存实现；
//! - `HandlerRegistry`：进程内路由模式到处理器的映射。
//!
//! 两者互不依赖，均以实例形式注入使用方。
//!
mod handler_registry;
mod inmemory;
mod schema_registry;

pub use handler_registry::{HandlerMetadata, HandlerRegistration, HandlerRegistry};
pub use inmemory::InMemorySchemaRegistry;
pub use schema_registry::{
    ExecutionMode, PublisherInfo, RegisterOutcome, SchemaRecord, SchemaRegistry,
};
