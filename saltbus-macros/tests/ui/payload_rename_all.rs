use saltbus_core::schema::Payload;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, saltbus_macros::Payload)]
#[serde(rename_all = "camelCase")]
struct ProfileUpdated {
    user_id: i64,
    display_name: String,
    #[serde(rename = "avatar")]
    avatar_url: Option<String>,
}

#[derive(Serialize, Deserialize, saltbus_macros::Payload)]
#[serde(deny_unknown_fields, rename_all = "SCREAMING-KEBAB-CASE")]
struct Header {
    content_type: String,
    r#type: String,
}

#[derive(Serialize, Deserialize, saltbus_macros::Payload)]
#[serde(rename_all(serialize = "PascalCase", deserialize = "PascalCase"))]
struct Audit {
    actor_id: i64,
}

fn main() {
    let schema = ProfileUpdated::schema().unwrap();
    let names: Vec<&str> = schema.fields().iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["userId", "displayName", "avatar"]);

    let value = serde_json::to_value(ProfileUpdated {
        user_id: 7,
        display_name: "Ada".into(),
        avatar_url: None,
    })
    .unwrap();
    let validated = schema.validate(&value).unwrap();
    assert_eq!(validated["userId"], 7);
    assert_eq!(validated["displayName"], "Ada");

    let header = Header::schema().unwrap();
    let names: Vec<&str> = header.fields().iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["CONTENT-TYPE", "TYPE"]);

    let audit = Audit::schema().unwrap();
    assert_eq!(audit.required_fields(), ["ActorId"]);
}
