//! 逐字段校验
//!
//! 校验结果为规整后的对象：缺失字段填充默认值（可选字段填 `null`），未声明的多余字段被丢弃，
//! 这正是“旧版本订阅方接收新版本消息”时忽略新增字段的方式。
//!
//! 失败时返回 `ValidationErrors`，可按字段逐条检视：路径（如 `items[0].email`）、
//! 消息与错误类别标签。
//!
use super::document::Schema;
use super::field::{Constraints, FieldKind, FieldSpec, StringFormat};
use crate::envelope::type_name;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// 摘要中最多展示的违规条目数
pub const SUMMARY_LIMIT: usize = 5;

/// 违规类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Missing,
    Type,
    Format,
    MinLength,
    MaxLength,
    Minimum,
    Maximum,
    Pattern,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::Missing => "missing",
            ViolationKind::Type => "type",
            ViolationKind::Format => "format",
            ViolationKind::MinLength => "min_length",
            ViolationKind::MaxLength => "max_length",
            ViolationKind::Minimum => "minimum",
            ViolationKind::Maximum => "maximum",
            ViolationKind::Pattern => "pattern",
        }
    }
}

/// 单条违规
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldViolation {
    pub path: String,
    pub message: String,
    pub kind: ViolationKind,
}

impl FieldViolation {
    fn location(&self) -> &str {
        if self.path.is_empty() { "root" } else { &self.path }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location(), self.message)
    }
}

/// 一次校验的全部违规
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationErrors {
    errors: Vec<FieldViolation>,
}

impl ValidationErrors {
    pub fn new(errors: Vec<FieldViolation>) -> Self {
        Self { errors }
    }

    pub fn errors(&self) -> &[FieldViolation] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// 单行摘要，最多展示 5 条，其余以 `... and N more` 结尾
    pub fn summary(&self) -> String {
        match self.errors.as_slice() {
            [] => "no validation errors".to_string(),
            [only] => format!("{only} [type={}]", only.kind.as_str()),
            all => {
                let mut parts: Vec<String> =
                    all.iter().take(SUMMARY_LIMIT).map(ToString::to_string).collect();
                if all.len() > SUMMARY_LIMIT {
                    parts.push(format!("... and {} more", all.len() - SUMMARY_LIMIT));
                }
                format!("{} validation errors: {}", all.len(), parts.join("; "))
            }
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

impl std::error::Error for ValidationErrors {}

impl Schema {
    /// 校验任意 JSON 值；非对象直接判为类型错误
    pub fn validate(&self, value: &Value) -> Result<Map<String, Value>, ValidationErrors> {
        match value {
            Value::Object(map) => self.validate_map(map),
            other => Err(ValidationErrors::new(vec![FieldViolation {
                path: String::new(),
                message: format!("expected object, found {}", type_name(other)),
                kind: ViolationKind::Type,
            }])),
        }
    }

    /// 校验对象字段，返回规整后的对象
    pub fn validate_map(&self, map: &Map<String, Value>) -> Result<Map<String, Value>, ValidationErrors> {
        let mut errors = Vec::new();
        let out = Validator { schema: self, errors: &mut errors }.record(self.fields(), map, "");
        if errors.is_empty() {
            Ok(out)
        } else {
            Err(ValidationErrors::new(errors))
        }
    }
}

struct Validator<'a> {
    schema: &'a Schema,
    errors: &'a mut Vec<FieldViolation>,
}

impl Validator<'_> {
    fn fail(&mut self, path: &str, kind: ViolationKind, message: impl Into<String>) {
        self.errors.push(FieldViolation {
            path: path.to_string(),
            message: message.into(),
            kind,
        });
    }

    fn record(&mut self, fields: &[FieldSpec], input: &Map<String, Value>, prefix: &str) -> Map<String, Value> {
        let mut out = Map::new();
        for field in fields {
            let path = join(prefix, &field.name);
            match input.get(&field.name) {
                Some(Value::Null) if !field.required => {
                    out.insert(field.name.clone(), Value::Null);
                }
                Some(value) => {
                    if let Some(v) = self.value(field, &field.kind, value, &path) {
                        out.insert(field.name.clone(), v);
                    }
                }
                None => match (&field.default, field.required) {
                    (Some(default), _) => {
                        out.insert(field.name.clone(), default.clone());
                    }
                    (None, true) => self.fail(&path, ViolationKind::Missing, "field required"),
                    (None, false) => {
                        out.insert(field.name.clone(), Value::Null);
                    }
                },
            }
        }
        out
    }

    fn value(&mut self, field: &FieldSpec, kind: &FieldKind, value: &Value, path: &str) -> Option<Value> {
        let checked = match (kind, value) {
            (FieldKind::Any, v) => v.clone(),
            (FieldKind::String(format), Value::String(s)) => {
                if let Some(format) = format {
                    self.format(*format, s, path);
                }
                self.length(&field.constraints, s.chars().count(), path, "characters");
                self.pattern(&field.constraints, s, path);
                value.clone()
            }
            (FieldKind::Integer, Value::Number(n)) => match as_integer(n) {
                Some((int, magnitude)) => {
                    self.bounds(&field.constraints, magnitude, path);
                    int
                }
                None => {
                    self.fail(path, ViolationKind::Type, "expected integer, found number");
                    return None;
                }
            },
            (FieldKind::Number, Value::Number(n)) => {
                if let Some(f) = n.as_f64() {
                    self.bounds(&field.constraints, f, path);
                }
                value.clone()
            }
            (FieldKind::Boolean, Value::Bool(_)) => value.clone(),
            (FieldKind::Object, Value::Object(_)) => value.clone(),
            (FieldKind::Record { fields, .. }, Value::Object(map)) => {
                Value::Object(self.record(fields, map, path))
            }
            (FieldKind::Array(item), Value::Array(items)) => {
                self.length(&field.constraints, items.len(), path, "items");
                // 元素级约束不继承字段级的长度/范围约束
                let element = FieldSpec::new(field.name.clone(), (**item).clone());
                let out: Vec<Value> = items
                    .iter()
                    .enumerate()
                    .filter_map(|(i, v)| self.value(&element, item, v, &format!("{path}[{i}]")))
                    .collect();
                Value::Array(out)
            }
            (kind, other) => {
                let expected = kind.type_name().unwrap_or("any");
                self.fail(
                    path,
                    ViolationKind::Type,
                    format!("expected {expected}, found {}", type_name(other)),
                );
                return None;
            }
        };
        Some(checked)
    }

    fn format(&mut self, format: StringFormat, s: &str, path: &str) {
        let ok = match format {
            StringFormat::Email => is_email(s),
            StringFormat::Uuid => uuid::Uuid::parse_str(s).is_ok(),
            StringFormat::DateTime => chrono::DateTime::parse_from_rfc3339(s).is_ok(),
        };
        if !ok {
            self.fail(
                path,
                ViolationKind::Format,
                format!("value is not a valid {}", format.as_str()),
            );
        }
    }

    fn length(&mut self, c: &Constraints, len: usize, path: &str, unit: &str) {
        let len = len as u64;
        if let Some(min) = c.min_length.filter(|min| len < *min) {
            self.fail(path, ViolationKind::MinLength, format!("should have at least {min} {unit}"));
        }
        if let Some(max) = c.max_length.filter(|max| len > *max) {
            self.fail(path, ViolationKind::MaxLength, format!("should have at most {max} {unit}"));
        }
    }

    fn bounds(&mut self, c: &Constraints, n: f64, path: &str) {
        if let Some(min) = c.minimum.filter(|min| n < *min) {
            self.fail(path, ViolationKind::Minimum, format!("should be greater than or equal to {min}"));
        }
        if let Some(max) = c.maximum.filter(|max| n > *max) {
            self.fail(path, ViolationKind::Maximum, format!("should be less than or equal to {max}"));
        }
    }

    fn pattern(&mut self, c: &Constraints, s: &str, path: &str) {
        let Some(pattern) = &c.pattern else { return };
        let schema = self.schema;
        if let Some(re) = schema.regex(pattern) {
            if !re.is_match(s) {
                self.fail(path, ViolationKind::Pattern, format!("should match pattern '{pattern}'"));
            }
        }
    }
}

// local@domain.tld，不含空白，且仅一个 `@`
fn is_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') || s.chars().any(char::is_whitespace) {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && !tld.is_empty(),
        None => false,
    }
}

// 返回规整后的整数值及其用于范围比较的浮点值；超出 i64 的正整数按 u64 保留
fn as_integer(n: &serde_json::Number) -> Option<(Value, f64)> {
    if let Some(i) = n.as_i64() {
        return Some((Value::from(i), i as f64));
    }
    if let Some(u) = n.as_u64() {
        return Some((Value::from(u), u as f64));
    }
    n.as_f64()
        .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
        .map(|f| (Value::from(f as i64), f))
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}
