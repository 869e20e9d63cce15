//! 版本比较（Version Comparator）
//!
//! 版本标签形如 `v1`、`v1.2.3`、`1.0`（前缀 `v`/`V` 可选）。解析结果为非负整数列表，
//! 比较时较短的一侧右补零，逐段比较。无法解析的标签解析为空列表：
//! 两个无法解析的标签相等；与可解析标签比较时按“全零”参与比较，结果确定但不承诺语义。
//!
//! 兼容性规则（处理器版本 vs 消息版本）：
//! - 处理器未声明版本或声明为 `latest`：兼容一切，包括未携带版本的旧消息；
//! - 消息未携带版本而处理器声明了具体版本：不兼容；
//! - 二者均为具体版本：处理器版本 <= 消息版本时兼容（向后兼容，不假设向前兼容）。
//!
use std::cmp::Ordering;

/// 表示“接受所有版本”的处理器版本，亦用于在注册表中解析最新版本
pub const LATEST: &str = "latest";

/// 解析版本标签为整数分段；无法解析时返回空列表
pub fn parse_version(tag: &str) -> Vec<u64> {
    let trimmed = tag.trim();
    let body = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed)
        .trim();

    if body.is_empty() {
        return Vec::new();
    }

    let mut parts = Vec::new();
    for segment in body.split('.') {
        if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
            return Vec::new();
        }
        match segment.parse::<u64>() {
            Ok(n) => parts.push(n),
            Err(_) => return Vec::new(),
        }
    }
    parts
}

/// 比较两个版本标签
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let left = parse_version(a);
    let right = parse_version(b);
    let len = left.len().max(right.len());

    (0..len)
        .map(|i| {
            let l = left.get(i).copied().unwrap_or(0);
            let r = right.get(i).copied().unwrap_or(0);
            l.cmp(&r)
        })
        .find(|ord| ord.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// 取主版本号；`latest`、缺失或无法解析时为 0
pub fn extract_major(tag: Option<&str>) -> u64 {
    match tag {
        None => 0,
        Some(t) if is_latest(Some(t)) => 0,
        Some(t) => parse_version(t).first().copied().unwrap_or(0),
    }
}

/// 是否表示“最新/不限版本”（未设置、空串或 `latest`）
pub fn is_latest(tag: Option<&str>) -> bool {
    match tag.map(str::trim) {
        None | Some("") => true,
        Some(t) => t.eq_ignore_ascii_case(LATEST),
    }
}

/// 判断声明了 `handler_version` 的处理器能否处理携带 `message_version` 的消息
pub fn is_compatible(handler_version: Option<&str>, message_version: Option<&str>) -> bool {
    if is_latest(handler_version) {
        return true;
    }

    let (Some(handler), Some(message)) = (handler_version, message_version) else {
        return false;
    };

    compare_versions(handler, message) != Ordering::Greater
}
