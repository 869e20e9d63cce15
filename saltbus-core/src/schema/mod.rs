//! 结构化 Schema 模块
//!
//! - `field`：字段声明与约束；
//! - `document`：Schema ↔ JSON Schema 文档；
//! - `validate`：逐字段校验与可检视的校验错误；
//! - `payload`：类型化载荷与字段类型映射（配合 `#[derive(Payload)]`）。
//!
mod document;
mod field;
mod payload;
mod validate;

pub use document::Schema;
pub use field::{Constraints, FieldKind, FieldSpec, StringFormat};
pub use payload::{FieldType, Payload};
pub use validate::{FieldViolation, SUMMARY_LIMIT, ValidationErrors, ViolationKind};
