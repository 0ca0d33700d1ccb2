use kline_core::config::LogConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// # Summary
/// 初始化全局日志：控制台输出 + 按天滚动的文件输出。
///
/// # Logic
/// 1. `RUST_LOG` 优先，否则使用配置中的过滤表达式。
/// 2. 文件写入走非阻塞通道。
///
/// # Returns
/// 文件写入器的守卫，必须持有到进程退出，否则尾部日志会丢失。
pub fn init(config: &LogConfig) -> WorkerGuard {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));
    let appender = tracing_appender::rolling::daily(&config.dir, "kline.log");
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();
    guard
}
