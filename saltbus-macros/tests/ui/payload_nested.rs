use saltbus_core::schema::{FieldKind, Payload};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, saltbus_macros::Payload)]
struct Line {
    sku: String,
    qty: u32,
}

#[derive(Serialize, Deserialize, saltbus_macros::Payload)]
struct Cart {
    lines: Vec<Line>,
    placed_at: chrono::DateTime<chrono::Utc>,
}

fn main() {
    let schema = Cart::schema().unwrap();
    match &schema.field("lines").unwrap().kind {
        FieldKind::Array(item) => match item.as_ref() {
            FieldKind::Record { title, fields } => {
                assert_eq!(title, "Line");
                assert_eq!(fields.len(), 2);
            }
            other => panic!("unexpected item kind {other:?}"),
        },
        other => panic!("unexpected kind {other:?}"),
    }

    let errors = schema
        .validate(&serde_json::json!({"lines": [{"sku": "a", "qty": "x"}], "placed_at": "nope"}))
        .unwrap_err();
    assert_eq!(errors.len(), 2);
}
