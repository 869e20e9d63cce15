//! saltbus 派生宏
//!
//! - `#[derive(Payload)]`：为具名字段结构体生成 `Payload`（字段描述列表）与 `FieldType`
//!   （作为嵌套字段时展开为 Record）实现；
//! - 容器参数：`#[payload(name = "...")]`，缺省为结构体名；
//! - 字段参数：`#[field(description, default, min_length, max_length, minimum, maximum, pattern, format, rename, skip)]`；
//! - 同时识别 `#[serde(rename = "...")]`、`#[serde(skip)]` 与容器上的 `#[serde(rename_all = "...")]`，保证 Schema 字段名与序列化结果一致。
//!
use proc_macro::TokenStream;

mod attrs;
mod payload;

#[proc_macro_derive(Payload, attributes(payload, field))]
pub fn derive_payload(input: TokenStream) -> TokenStream {
    payload::expand(input)
}
