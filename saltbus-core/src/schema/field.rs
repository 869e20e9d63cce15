//! 字段声明（FieldSpec）
//!
//! 一个 Schema 由若干字段声明组成，每个字段包含：名称、类型标签、是否必填、
//! 默认值、描述与约束（长度、数值范围、正则、字符串格式）。
//!
use serde_json::Value;

/// 字符串格式约束
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringFormat {
    Email,
    Uuid,
    DateTime,
}

impl StringFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            StringFormat::Email => "email",
            StringFormat::Uuid => "uuid",
            StringFormat::DateTime => "date-time",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "email" => Some(StringFormat::Email),
            "uuid" => Some(StringFormat::Uuid),
            "date-time" | "datetime" => Some(StringFormat::DateTime),
            _ => None,
        }
    }
}

/// 字段类型标签
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    String(Option<StringFormat>),
    Integer,
    Number,
    Boolean,
    Array(Box<FieldKind>),
    /// 任意 JSON 对象（不校验内部结构）
    Object,
    /// 具名嵌套结构
    Record { title: String, fields: Vec<FieldSpec> },
    /// 不做类型校验
    Any,
}

impl FieldKind {
    pub fn array_of(item: FieldKind) -> Self {
        FieldKind::Array(Box::new(item))
    }

    /// JSON Schema 中的 `type` 值
    pub fn type_name(&self) -> Option<&'static str> {
        match self {
            FieldKind::String(_) => Some("string"),
            FieldKind::Integer => Some("integer"),
            FieldKind::Number => Some("number"),
            FieldKind::Boolean => Some("boolean"),
            FieldKind::Array(_) => Some("array"),
            FieldKind::Object | FieldKind::Record { .. } => Some("object"),
            FieldKind::Any => None,
        }
    }
}

/// 字段约束
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Constraints {
    pub min_length: Option<u64>,
    pub max_length: Option<u64>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub pattern: Option<String>,
}

impl Constraints {
    pub fn is_empty(&self) -> bool {
        self == &Constraints::default()
    }
}

/// 单个字段声明
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub default: Option<Value>,
    pub description: Option<String>,
    pub constraints: Constraints,
}

impl FieldSpec {
    /// 必填字段
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            default: None,
            description: None,
            constraints: Constraints::default(),
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::String(None))
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Number)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    /// 设置默认值；带默认值的字段视为非必填
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self.required = false;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn format(mut self, format: StringFormat) -> Self {
        if let FieldKind::String(f) = &mut self.kind {
            *f = Some(format);
        }
        self
    }

    pub fn min_length(mut self, n: u64) -> Self {
        self.constraints.min_length = Some(n);
        self
    }

    pub fn max_length(mut self, n: u64) -> Self {
        self.constraints.max_length = Some(n);
        self
    }

    pub fn minimum(mut self, n: f64) -> Self {
        self.constraints.minimum = Some(n);
        self
    }

    pub fn maximum(mut self, n: f64) -> Self {
        self.constraints.maximum = Some(n);
        self
    }

    pub fn pattern(mut self, regex: impl Into<String>) -> Self {
        self.constraints.pattern = Some(regex.into());
        self
    }
}
