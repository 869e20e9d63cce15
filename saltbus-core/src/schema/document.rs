//! Schema 与 JSON Schema 文档互转
//!
//! - `Schema::to_document`：字段声明 → JSON Schema 文档（属性按声明顺序输出）；
//! - `Schema::from_document`：注册表中取回的文档 → 等价的 Schema（订阅方无需原始类型）。
//!
//! 两个方向共用同一套字段模型，保证“声明 → 注册 → 取回 → 校验”的行为一致。
//!
use super::field::{Constraints, FieldKind, FieldSpec, StringFormat};
use crate::error::{SaltError, SaltResult};
use regex::Regex;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::Arc;

/// 已编译的结构化 Schema
#[derive(Debug, Clone)]
pub struct Schema {
    title: String,
    fields: Vec<FieldSpec>,
    patterns: Arc<HashMap<String, Regex>>,
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.title == other.title && self.fields == other.fields
    }
}

impl Schema {
    /// 由显式字段列表构建；正则约束在此一次性编译
    pub fn new(title: impl Into<String>, fields: Vec<FieldSpec>) -> SaltResult<Self> {
        let mut patterns = HashMap::new();
        compile_patterns(&fields, &mut patterns)?;
        Ok(Self {
            title: title.into(),
            fields,
            patterns: Arc::new(patterns),
        })
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// 必填字段名（声明顺序）
    pub fn required_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect()
    }

    pub(crate) fn regex(&self, pattern: &str) -> Option<&Regex> {
        self.patterns.get(pattern)
    }

    /// 输出 JSON Schema 文档
    pub fn to_document(&self) -> Value {
        record_document(&self.title, &self.fields)
    }

    /// 从 JSON Schema 文档重建
    pub fn from_document(document: &Value) -> SaltResult<Self> {
        let root = document
            .as_object()
            .ok_or_else(|| SaltError::invalid_schema("schema document must be an object"))?;
        let defs = root
            .get("$defs")
            .or_else(|| root.get("definitions"))
            .and_then(Value::as_object);

        let title = root
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or("Schema")
            .to_string();
        let fields = fields_from_object(root, defs, 0)?;
        Self::new(title, fields)
    }
}

fn compile_patterns(fields: &[FieldSpec], out: &mut HashMap<String, Regex>) -> SaltResult<()> {
    for field in fields {
        if let Some(p) = &field.constraints.pattern {
            if !out.contains_key(p) {
                let re = Regex::new(p).map_err(|e| {
                    SaltError::invalid_schema(format!("field '{}': bad pattern: {e}", field.name))
                })?;
                out.insert(p.clone(), re);
            }
        }
        compile_kind_patterns(&field.kind, out)?;
    }
    Ok(())
}

fn compile_kind_patterns(kind: &FieldKind, out: &mut HashMap<String, Regex>) -> SaltResult<()> {
    match kind {
        FieldKind::Record { fields, .. } => compile_patterns(fields, out),
        FieldKind::Array(item) => compile_kind_patterns(item, out),
        _ => Ok(()),
    }
}

// ---------- 序列化方向 ----------

fn record_document(title: &str, fields: &[FieldSpec]) -> Value {
    let mut properties = Map::new();
    for field in fields {
        properties.insert(field.name.clone(), field_document(field));
    }
    let required: Vec<Value> = fields
        .iter()
        .filter(|f| f.required)
        .map(|f| Value::String(f.name.clone()))
        .collect();

    json!({
        "title": title,
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn field_document(field: &FieldSpec) -> Value {
    let mut doc = kind_document(&field.kind);
    let Value::Object(obj) = &mut doc else {
        return doc;
    };

    if !field.constraints.is_empty() {
        apply_constraints(obj, &field.kind, &field.constraints);
    }
    if let Some(default) = &field.default {
        obj.insert("default".into(), default.clone());
    }
    if let Some(desc) = &field.description {
        obj.insert("description".into(), Value::String(desc.clone()));
    }
    doc
}

fn kind_document(kind: &FieldKind) -> Value {
    match kind {
        FieldKind::String(Some(format)) => json!({"type": "string", "format": format.as_str()}),
        FieldKind::Array(item) => json!({"type": "array", "items": kind_document(item)}),
        FieldKind::Record { title, fields } => record_document(title, fields),
        FieldKind::Any => json!({}),
        other => match other.type_name() {
            Some(t) => json!({ "type": t }),
            None => json!({}),
        },
    }
}

fn apply_constraints(obj: &mut Map<String, Value>, kind: &FieldKind, c: &Constraints) {
    let (min_key, max_key) = match kind {
        FieldKind::Array(_) => ("minItems", "maxItems"),
        _ => ("minLength", "maxLength"),
    };
    if let Some(n) = c.min_length {
        obj.insert(min_key.into(), json!(n));
    }
    if let Some(n) = c.max_length {
        obj.insert(max_key.into(), json!(n));
    }
    if let Some(n) = c.minimum {
        obj.insert("minimum".into(), number(n));
    }
    if let Some(n) = c.maximum {
        obj.insert("maximum".into(), number(n));
    }
    if let Some(p) = &c.pattern {
        obj.insert("pattern".into(), Value::String(p.clone()));
    }
}

// 整数边界输出为整数，避免 `0.0` 与 `0` 在文档比较时不相等
fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        json!(n as i64)
    } else {
        json!(n)
    }
}

// ---------- 反序列化方向 ----------

const MAX_REF_DEPTH: usize = 16;

fn fields_from_object(
    obj: &Map<String, Value>,
    defs: Option<&Map<String, Value>>,
    depth: usize,
) -> SaltResult<Vec<FieldSpec>> {
    let required: Vec<&str> = obj
        .get("required")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let Some(properties) = obj.get("properties") else {
        return Ok(Vec::new());
    };
    let properties = properties
        .as_object()
        .ok_or_else(|| SaltError::invalid_schema("'properties' must be an object"))?;

    properties
        .iter()
        .map(|(name, prop)| {
            let prop = prop.as_object().ok_or_else(|| {
                SaltError::invalid_schema(format!("property '{name}' must be an object"))
            })?;
            let kind = kind_from_property(prop, defs, depth)?;
            let default = prop.get("default").cloned();
            Ok(FieldSpec {
                name: name.clone(),
                required: required.contains(&name.as_str()) && default.is_none(),
                constraints: constraints_from_property(prop),
                description: prop
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                default,
                kind,
            })
        })
        .collect()
}

fn kind_from_property(
    prop: &Map<String, Value>,
    defs: Option<&Map<String, Value>>,
    depth: usize,
) -> SaltResult<FieldKind> {
    if depth > MAX_REF_DEPTH {
        return Err(SaltError::invalid_schema("schema nesting too deep"));
    }

    if let Some(reference) = prop.get("$ref").and_then(Value::as_str) {
        let name = reference.rsplit('/').next().unwrap_or(reference);
        return match defs.and_then(|d| d.get(name)).and_then(Value::as_object) {
            Some(target) => kind_from_property(target, defs, depth + 1),
            None => Ok(FieldKind::Any),
        };
    }

    // 可空字段常见写法：anyOf [{..}, {"type": "null"}]
    if let Some(variants) = prop.get("anyOf").and_then(Value::as_array) {
        let concrete = variants
            .iter()
            .filter_map(Value::as_object)
            .find(|v| v.get("type").and_then(Value::as_str) != Some("null"));
        return match concrete {
            Some(v) => kind_from_property(v, defs, depth + 1),
            None => Ok(FieldKind::Any),
        };
    }

    let kind = match prop.get("type").and_then(Value::as_str) {
        Some("string") => FieldKind::String(
            prop.get("format")
                .and_then(Value::as_str)
                .and_then(StringFormat::parse),
        ),
        Some("integer") => FieldKind::Integer,
        Some("number") => FieldKind::Number,
        Some("boolean") => FieldKind::Boolean,
        Some("array") => {
            let item = match prop.get("items").and_then(Value::as_object) {
                Some(items) => kind_from_property(items, defs, depth + 1)?,
                None => FieldKind::Any,
            };
            FieldKind::array_of(item)
        }
        Some("object") if prop.contains_key("properties") => FieldKind::Record {
            title: prop
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or("Object")
                .to_string(),
            fields: fields_from_object(prop, defs, depth + 1)?,
        },
        Some("object") => FieldKind::Object,
        _ => FieldKind::Any,
    };
    Ok(kind)
}

fn constraints_from_property(prop: &Map<String, Value>) -> Constraints {
    let int = |keys: [&str; 2]| {
        keys.iter()
            .find_map(|k| prop.get(*k).and_then(Value::as_u64))
    };
    Constraints {
        min_length: int(["minLength", "minItems"]),
        max_length: int(["maxLength", "maxItems"]),
        minimum: prop.get("minimum").and_then(Value::as_f64),
        maximum: prop.get("maximum").and_then(Value::as_f64),
        pattern: prop
            .get("pattern")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signup() -> Schema {
        Schema::new(
            "UserSignup",
            vec![
                FieldSpec::integer("user_id").minimum(1.0),
                FieldSpec::string("email").format(StringFormat::Email),
                FieldSpec::string("plan").with_default(json!("free")),
                FieldSpec::new("tags", FieldKind::array_of(FieldKind::String(None)))
                    .optional()
                    .max_length(5),
            ],
        )
        .unwrap()
    }

    #[test]
    fn document_lists_required_in_declaration_order() {
        let doc = signup().to_document();
        assert_eq!(doc["title"], "UserSignup");
        assert_eq!(doc["type"], "object");
        assert_eq!(doc["required"], json!(["user_id", "email"]));
        let keys: Vec<&String> = doc["properties"].as_object().unwrap().keys().collect();
        assert_eq!(keys, ["user_id", "email", "plan", "tags"]);
        assert_eq!(doc["properties"]["email"]["format"], "email");
        assert_eq!(doc["properties"]["plan"]["default"], "free");
        assert_eq!(doc["properties"]["tags"]["maxItems"], 5);
        assert_eq!(doc["properties"]["user_id"]["minimum"], 1);
    }

    #[test]
    fn document_reconstructs_equivalent_schema() {
        let original = signup();
        let rebuilt = Schema::from_document(&original.to_document()).unwrap();
        assert_eq!(rebuilt, original);
        assert_eq!(rebuilt.to_document(), original.to_document());
    }

    #[test]
    fn nested_records_and_refs_are_understood() {
        let doc = json!({
            "title": "Order",
            "type": "object",
            "$defs": {
                "Item": {
                    "title": "Item",
                    "type": "object",
                    "properties": {"sku": {"type": "string"}},
                    "required": ["sku"]
                }
            },
            "properties": {
                "items": {"type": "array", "items": {"$ref": "#/$defs/Item"}},
                "note": {"anyOf": [{"type": "string"}, {"type": "null"}], "default": null}
            },
            "required": ["items"]
        });
        let schema = Schema::from_document(&doc).unwrap();
        let items = schema.field("items").unwrap();
        assert!(items.required);
        match &items.kind {
            FieldKind::Array(inner) => match inner.as_ref() {
                FieldKind::Record { title, fields } => {
                    assert_eq!(title, "Item");
                    assert_eq!(fields[0].name, "sku");
                }
                other => panic!("unexpected item kind {other:?}"),
            },
            other => panic!("unexpected kind {other:?}"),
        }
        let note = schema.field("note").unwrap();
        assert!(!note.required);
        assert_eq!(note.kind, FieldKind::String(None));
    }

    #[test]
    fn rejects_invalid_documents_and_patterns() {
        assert!(Schema::from_document(&json!([1, 2])).is_err());
        assert!(Schema::from_document(&json!({"properties": 5})).is_err());
        assert!(Schema::new("Bad", vec![FieldSpec::string("x").pattern("(")]).is_err());
    }
}
