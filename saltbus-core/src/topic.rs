//! 主题与路由模式（AMQP topic 语义）
//!
//! 主题以 `.` 分段（如 `user.signup.completed`）。订阅模式支持：
//! - `*` 恰好匹配一段；
//! - `#` 匹配零到多段，可出现在任意位置。
//!
//! 匹配是模式串与路由键之间的纯函数，不涉及任何 I/O。
//!
use crate::error::{SaltError, SaltResult};
use std::fmt;

const SEGMENT_SEPARATOR: char = '.';
const WILDCARD_SINGLE: &str = "*";
const WILDCARD_MULTI: &str = "#";

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternSegment {
    Literal(String),
    Single,
    Multi,
}

/// 已解析的路由模式
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    segments: Vec<PatternSegment>,
    original: String,
}

impl TopicPattern {
    pub fn new(pattern: impl Into<String>) -> SaltResult<Self> {
        let original = pattern.into();
        let segments = Self::parse(&original)?;
        Ok(Self { segments, original })
    }

    pub fn as_str(&self) -> &str {
        &self.original
    }

    /// 是否包含通配段
    pub fn has_wildcards(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, PatternSegment::Single | PatternSegment::Multi))
    }

    /// 判断路由键是否匹配本模式
    pub fn matches(&self, routing_key: &str) -> bool {
        let key: Vec<&str> = routing_key.split(SEGMENT_SEPARATOR).collect();
        match_segments(&self.segments, &key)
    }

    fn parse(pattern: &str) -> SaltResult<Vec<PatternSegment>> {
        if pattern.trim().is_empty() {
            return Err(invalid(pattern, "pattern cannot be empty"));
        }

        pattern
            .split(SEGMENT_SEPARATOR)
            .enumerate()
            .map(|(i, part)| match part {
                "" => Err(invalid(pattern, &format!("empty segment at position {i}"))),
                WILDCARD_SINGLE => Ok(PatternSegment::Single),
                WILDCARD_MULTI => Ok(PatternSegment::Multi),
                lit if lit.contains('*') || lit.contains('#') => Err(invalid(
                    pattern,
                    &format!("wildcards must be standalone segments, found '{lit}'"),
                )),
                lit => Ok(PatternSegment::Literal(lit.to_string())),
            })
            .collect()
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

fn invalid(pattern: &str, reason: &str) -> SaltError {
    SaltError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: reason.to_string(),
    }
}

// 迭代回溯：只记录最近一个 `#` 的位置，最坏 O(模式段数 × 路由键段数)
fn match_segments(pattern: &[PatternSegment], key: &[&str]) -> bool {
    let (mut p, mut k) = (0, 0);
    // (`#` 之后的模式位置, 该 `#` 当前吞到的路由键位置)
    let mut resume: Option<(usize, usize)> = None;

    while k < key.len() {
        match pattern.get(p) {
            Some(PatternSegment::Multi) => {
                p += 1;
                resume = Some((p, k));
                continue;
            }
            Some(PatternSegment::Single) => {
                p += 1;
                k += 1;
                continue;
            }
            Some(PatternSegment::Literal(lit)) if lit == key[k] => {
                p += 1;
                k += 1;
                continue;
            }
            _ => {}
        }
        // 不匹配：让最近的 `#` 多吞一段后重试
        match resume {
            Some((after, swallowed)) => {
                p = after;
                k = swallowed + 1;
                resume = Some((after, k));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|s| matches!(s, PatternSegment::Multi))
}

/// 便捷函数：模式串无法解析时视为不匹配
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    TopicPattern::new(pattern)
        .map(|p| p.matches(routing_key))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_pattern_matches_only_itself() {
        assert!(topic_matches("user.signup.completed", "user.signup.completed"));
        assert!(!topic_matches("user.signup.completed", "user.signup"));
        assert!(!topic_matches("user.signup", "user.signup.completed"));
    }

    #[test]
    fn star_matches_exactly_one_segment() {
        assert!(topic_matches("rpc.*.list", "rpc.test.list"));
        assert!(topic_matches("user.*", "user.created"));
        assert!(!topic_matches("user.*", "user.signup.completed"));
        assert!(!topic_matches("user.*", "user"));
        assert!(!topic_matches("rpc.*.list", "rpc.other.get"));
    }

    #[test]
    fn hash_matches_zero_or_more_segments_anywhere() {
        assert!(topic_matches("#", "anything.at.all"));
        assert!(topic_matches("user.#", "user"));
        assert!(topic_matches("user.#", "user.signup.completed"));
        assert!(topic_matches("#.completed", "user.signup.completed"));
        assert!(topic_matches("user.#.completed", "user.completed"));
        assert!(topic_matches("user.#.completed", "user.a.b.completed"));
        assert!(!topic_matches("user.#.completed", "user.a.b.failed"));
        assert!(!topic_matches("order.#", "user.created"));
    }

    #[test]
    fn many_hash_segments_match_without_blowup() {
        let pattern = vec!["#"; 24].join(".") + ".end";
        let key = vec!["x"; 40].join(".");
        assert!(!topic_matches(&pattern, &key));
        assert!(topic_matches(&pattern, &(key.clone() + ".end")));
        assert!(topic_matches("a.#.b.#.c", "a.x.b.y.b.z.c"));
        assert!(!topic_matches("a.#.b.#.c", "a.x.c.b"));
    }

    #[test]
    fn rejects_malformed_patterns() {
        assert!(TopicPattern::new("").is_err());
        assert!(TopicPattern::new("user..created").is_err());
        assert!(TopicPattern::new("user.cre*").is_err());
        assert!(!topic_matches("user.cre*", "user.created"));
    }

    #[test]
    fn reports_wildcards() {
        assert!(TopicPattern::new("user.*").unwrap().has_wildcards());
        assert!(TopicPattern::new("#").unwrap().has_wildcards());
        assert!(!TopicPattern::new("rpc.add").unwrap().has_wildcards());
    }
}
