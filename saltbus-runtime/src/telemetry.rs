use tracing_subscriber::EnvFilter;

/// 安装 fmt 日志输出；`RUST_LOG` 优先，否则使用 `default_filter`。仅供二进制入口调用。
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
