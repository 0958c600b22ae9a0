//! 日志初始化
//!
//! 通过 `RUST_LOG` 控制级别，默认 `info`

use tracing_subscriber::EnvFilter;

/// 初始化全局日志订阅者
///
/// 可重复调用（测试中每个用例都会调用），只有第一次生效
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
