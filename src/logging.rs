//! 日志初始化

use crate::config::{LogConfig, LogFormat};
use tracing_subscriber::EnvFilter;

/// 按配置安装全局 tracing 订阅者
///
/// `RUST_LOG` 优先于配置中的级别。重复调用不会报错，返回是否由本次调用完成安装。
pub fn init_logging(config: &LogConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let result = match config.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .try_init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init(),
    };

    result.is_ok()
}
