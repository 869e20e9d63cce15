//! 运行时配置（SaltConfig）
//!
//! - `from_file`：读取 TOML 文件；
//! - `from_env`：在缺省值之上叠加 `SALTBUS_*` 环境变量（如 `SALTBUS_WORKER_CONCURRENCY=8`）；
//! - `load`：先文件后环境变量。
//!
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const ENV_PREFIX: &str = "SALTBUS_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaltConfig {
    /// 主题交换机名称
    pub exchange_name: String,
    /// 分发入口名称
    pub dispatcher_name: String,
    pub queue_name: String,
    /// `call()` 的缺省超时
    pub rpc_timeout_ms: u64,
    /// 进程内代理并发分发数
    pub worker_concurrency: usize,
    pub queue_capacity: usize,
    /// 分发致命失败后的重投次数
    pub max_redeliveries: u32,
    pub broadcast_max_retries: u32,
    pub broadcast_retry_backoff_ms: u64,
}

impl Default for SaltConfig {
    fn default() -> Self {
        Self {
            exchange_name: "tchu_events".to_string(),
            dispatcher_name: "saltbus.dispatch_event".to_string(),
            queue_name: "saltbus_queue".to_string(),
            rpc_timeout_ms: 30_000,
            worker_concurrency: 4,
            queue_capacity: 1024,
            max_redeliveries: 3,
            broadcast_max_retries: 0,
            broadcast_retry_backoff_ms: 100,
        }
    }
}

impl SaltConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_overrides(std::env::vars())
    }

    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        base.with_overrides(std::env::vars())
    }

    /// 以 `SALTBUS_<KEY>=<value>` 形式的键值覆盖当前配置；值按 TOML 标量解析，失败时视为字符串
    pub fn with_overrides<I>(self, vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let toml::Value::Table(mut table) =
            toml::Value::try_from(&self).map_err(|e| ConfigError::Invalid(e.to_string()))?
        else {
            return Err(ConfigError::Invalid("configuration is not a table".into()));
        };
        for (key, raw) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let name = name.to_ascii_lowercase();
            if !table.contains_key(&name) {
                continue;
            }
            table.insert(name, scalar(&raw));
        }
        let config: Self = toml::Value::Table(table).try_into()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_concurrency == 0 {
            return Err(ConfigError::Invalid("worker_concurrency must be > 0".into()));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be > 0".into()));
        }
        if self.rpc_timeout_ms == 0 {
            return Err(ConfigError::Invalid("rpc_timeout_ms must be > 0".into()));
        }
        Ok(())
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn broadcast_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.broadcast_retry_backoff_ms)
    }
}

fn scalar(raw: &str) -> toml::Value {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<i64>() {
        return toml::Value::Integer(n);
    }
    if let Ok(b) = raw.parse::<bool>() {
        return toml::Value::Boolean(b);
    }
    toml::Value::String(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_are_valid() {
        let config = SaltConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.exchange_name, "tchu_events");
        assert_eq!(config.rpc_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn env_overrides_known_keys_only() {
        let config = SaltConfig::default()
            .with_overrides(vars(&[
                ("SALTBUS_WORKER_CONCURRENCY", "8"),
                ("SALTBUS_QUEUE_NAME", "orders"),
                ("SALTBUS_UNKNOWN", "1"),
                ("PATH", "/usr/bin"),
            ]))
            .unwrap();
        assert_eq!(config.worker_concurrency, 8);
        assert_eq!(config.queue_name, "orders");
        assert_eq!(config.max_redeliveries, 3);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = SaltConfig::default()
            .with_overrides(vars(&[("SALTBUS_WORKER_CONCURRENCY", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = SaltConfig::default()
            .with_overrides(vars(&[("SALTBUS_RPC_TIMEOUT_MS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: SaltConfig = toml::from_str("queue_capacity = 16\n").unwrap();
        assert_eq!(config.queue_capacity, 16);
        assert_eq!(config.dispatcher_name, "saltbus.dispatch_event");
    }
}
