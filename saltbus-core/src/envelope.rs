//! 线上信封（Dispatch Envelope）
//!
//! 每条消息体为一个 JSON 对象：主题相关的业务字段 + 保留键 `_meta` 元数据块。
//! 元数据携带 `is_rpc`、可选的 `version`/`correlation_id` 及链路追踪字段。
//!
//! 缺少元数据块表示旧版/外部生产者，按 `is_rpc = true`（同步直调）处理；
//! 旧协议的 `_tchu_meta` 键作为别名同样被识别，二者都会在交给处理器前剥离。
//!
use crate::error::{SaltError, SaltResult};
use bon::Builder;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// 元数据块的保留键
pub const META_KEY: &str = "_meta";
/// 旧协议使用的元数据键
pub const LEGACY_META_KEY: &str = "_tchu_meta";

/// 信封元数据
#[derive(Builder, Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    /// 是否为 RPC 消息
    #[serde(default)]
    #[builder(default)]
    is_rpc: bool,
    /// 消息声明的 Schema 版本
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    version: Option<String>,
    /// 关联 ID，贯穿一次业务操作
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    correlation_id: Option<String>,
    /// 链路追踪上下文（如 `traceparent`），平铺在元数据块中
    #[serde(flatten)]
    #[builder(default)]
    trace: BTreeMap<String, Value>,
}

impl Meta {
    pub fn is_rpc(&self) -> bool {
        self.is_rpc
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn trace(&self) -> &BTreeMap<String, Value> {
        &self.trace
    }
}

/// 解码后的信封：业务载荷 + 可选元数据
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    payload: Map<String, Value>,
    meta: Option<Meta>,
}

impl Envelope {
    pub fn new(payload: Map<String, Value>, meta: Meta) -> Self {
        Self {
            payload,
            meta: Some(meta),
        }
    }

    /// 编码为线上 JSON 文本，业务字段与 `_meta` 同级
    pub fn encode(&self) -> SaltResult<String> {
        let mut body = self.payload.clone();
        body.remove(META_KEY);
        body.remove(LEGACY_META_KEY);
        if let Some(meta) = &self.meta {
            body.insert(META_KEY.to_string(), serde_json::to_value(meta)?);
        }
        Ok(serde_json::to_string(&Value::Object(body))?)
    }

    /// 从线上 JSON 文本解码，并剥离元数据键
    pub fn decode(body: &str) -> SaltResult<Self> {
        let value: Value = serde_json::from_str(body)?;
        let Value::Object(mut payload) = value else {
            return Err(SaltError::InvalidEnvelope {
                reason: format!("expected a JSON object, found {}", type_name(&value)),
            });
        };

        let primary = payload.remove(META_KEY);
        let legacy = payload.remove(LEGACY_META_KEY);

        let meta = match primary.or(legacy) {
            None => None,
            Some(raw @ Value::Object(_)) => Some(serde_json::from_value::<Meta>(raw).map_err(
                |e| SaltError::InvalidEnvelope {
                    reason: format!("malformed metadata block: {e}"),
                },
            )?),
            Some(other) => {
                return Err(SaltError::InvalidEnvelope {
                    reason: format!("metadata block must be an object, found {}", type_name(&other)),
                });
            }
        };

        Ok(Self { payload, meta })
    }

    /// 执行模式：无元数据的旧消息默认按 RPC 处理
    pub fn is_rpc(&self) -> bool {
        self.meta.as_ref().map(Meta::is_rpc).unwrap_or(true)
    }

    pub fn meta(&self) -> Option<&Meta> {
        self.meta.as_ref()
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn into_parts(self) -> (Map<String, Value>, Option<Meta>) {
        (self.payload, self.meta)
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
