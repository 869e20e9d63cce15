use saltbus_core::schema::{Payload, StringFormat};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, saltbus_macros::Payload)]
#[payload(name = "Registration")]
struct Register {
    #[field(format = "email", description = "contact address")]
    email: String,
    #[field(min_length = 3, max_length = 16, pattern = "^[a-z0-9_]+$")]
    username: String,
    #[field(minimum = 13, maximum = 120.5)]
    age: u32,
    #[field(default = "free")]
    plan: String,
    #[serde(rename = "ref")]
    referrer: Option<uuid::Uuid>,
    #[serde(skip)]
    #[field(skip)]
    cache: Vec<u8>,
}

fn main() {
    assert_eq!(Register::NAME, "Registration");
    let schema = Register::schema().unwrap();
    let names: Vec<&str> = schema.fields().iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["email", "username", "age", "plan", "ref"]);
    assert_eq!(schema.required_fields(), ["email", "username", "age"]);

    let email = schema.field("email").unwrap();
    assert_eq!(email.kind, saltbus_core::schema::FieldKind::String(Some(StringFormat::Email)));
    let age = schema.field("age").unwrap();
    assert_eq!(age.constraints.maximum, Some(120.5));
    assert_eq!(schema.field("plan").unwrap().default, Some(serde_json::json!("free")));
}
