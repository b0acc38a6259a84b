//! tracing 订阅器初始化
//!
//! 控制台 + 滚动文件双输出；级别优先读 RUST_LOG，其次取配置值。
//! 返回的 WorkerGuard 需由调用方持有到进程退出，否则文件日志会丢尾。

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::config::LoggingConfig;

/// 初始化全局日志订阅器
///
/// 重复初始化返回错误（tracing 全局订阅器只能设置一次）。
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));

    let mut guard = None;
    let writer = if config.file_enabled {
        let dir = config.effective_log_dir();
        std::fs::create_dir_all(&dir)?;
        let appender = tracing_appender::rolling::daily(&dir, "switchdeck.log");
        let (writer, g) = tracing_appender::non_blocking(appender);
        guard = Some(g);
        Some(writer)
    } else {
        None
    };

    let registry = tracing_subscriber::registry().with(filter);

    if config.json_format {
        registry
            .with(writer.map(|w| fmt::layer().with_writer(w).with_ansi(false).json()))
            .with(config.console_enabled.then(|| fmt::layer().json()))
            .try_init()?;
    } else {
        registry
            .with(writer.map(|w| fmt::layer().with_writer(w).with_ansi(false)))
            .with(config.console_enabled.then(|| fmt::layer()))
            .try_init()?;
    }

    tracing::info!(level = %config.level, "日志系统已初始化");
    Ok(guard)
}
