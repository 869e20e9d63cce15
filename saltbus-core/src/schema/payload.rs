//! 类型化载荷（Payload）
//!
//! `Payload` 由 `#[derive(Payload)]` 生成：在编译期一次性列出结构体的具名字段，
//! 产出显式的字段声明列表，运行期不做任何反射。
//!
//! `FieldType` 把 Rust 字段类型映射为 Schema 类型标签；`Option<T>` 视为非必填。
//!
use super::document::Schema;
use super::field::{FieldKind, FieldSpec, StringFormat};
use crate::error::SaltResult;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

/// 可声明为事件/请求/响应的类型化载荷
pub trait Payload {
    /// Schema 标题（默认为类型名）
    const NAME: &'static str;

    /// 字段声明（声明顺序）
    fn fields() -> Vec<FieldSpec>;

    fn schema() -> SaltResult<Schema> {
        Schema::new(Self::NAME, Self::fields())
    }
}

/// 字段类型到 Schema 类型标签的映射
pub trait FieldType {
    fn kind() -> FieldKind;

    /// 缺省为必填；`Option<T>` 覆盖为 false
    const REQUIRED: bool = true;
}

macro_rules! field_type {
    ($kind:expr => $($ty:ty),+ $(,)?) => {
        $(
            impl FieldType for $ty {
                fn kind() -> FieldKind {
                    $kind
                }
            }
        )+
    };
}

field_type!(FieldKind::String(None) => String, str, char);
field_type!(FieldKind::Integer => i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);
field_type!(FieldKind::Number => f32, f64);
field_type!(FieldKind::Boolean => bool);
field_type!(FieldKind::Any => Value);
field_type!(FieldKind::Object => Map<String, Value>);
field_type!(FieldKind::String(Some(StringFormat::Uuid)) => uuid::Uuid);
field_type!(FieldKind::String(Some(StringFormat::DateTime)) => chrono::DateTime<chrono::Utc>);

impl<T: FieldType + ?Sized> FieldType for &T {
    fn kind() -> FieldKind {
        T::kind()
    }
    const REQUIRED: bool = T::REQUIRED;
}

impl<T: FieldType> FieldType for Option<T> {
    fn kind() -> FieldKind {
        T::kind()
    }
    const REQUIRED: bool = false;
}

impl<T: FieldType> FieldType for Vec<T> {
    fn kind() -> FieldKind {
        FieldKind::array_of(T::kind())
    }
}

impl<T: FieldType> FieldType for Box<T> {
    fn kind() -> FieldKind {
        T::kind()
    }
    const REQUIRED: bool = T::REQUIRED;
}

impl<K, V, S> FieldType for HashMap<K, V, S> {
    fn kind() -> FieldKind {
        FieldKind::Object
    }
}

impl<K, V> FieldType for BTreeMap<K, V> {
    fn kind() -> FieldKind {
        FieldKind::Object
    }
}
