use saltbus_core::schema::{FieldKind, Payload};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, saltbus_macros::Payload)]
struct Order {
    id: i64,
    /// 下单用户
    customer: String,
    amount: f64,
    note: Option<String>,
}

fn main() {
    assert_eq!(Order::NAME, "Order");
    let schema = Order::schema().unwrap();
    assert_eq!(schema.required_fields(), ["id", "customer", "amount"]);
    assert_eq!(schema.fields()[0].kind, FieldKind::Integer);
    assert_eq!(schema.fields()[1].description.as_deref(), Some("下单用户"));
    assert!(!schema.fields()[3].required);
}
