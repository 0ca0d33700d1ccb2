use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use kline_core::common::time::{RealTimeProvider, TimeProvider};
use kline_feed::BinanceProvider;
use kline_market::backfill::BackfillOrchestrator;
use kline_market::limiter::TokenBucket;
use kline_market::live::LiveIngestor;
use kline_market::maintenance::Maintenance;
use kline_market::rolling::RollingStoreImpl;
use kline_store::SqliteChartStore;
use tokio::sync::watch;
use tracing::{error, info};

mod settings;
mod telemetry;

/// # Summary
/// 应用启动入口，纯粹的 DI 容器。
/// 负责实例化所有具体实现组件，并以 `Arc<dyn Trait>` 注入滚动存储与后台任务。
///
/// # Logic
/// 1. 加载配置并初始化全局日志。
/// 2. 实例化基础设施层（Feed、Store）。
/// 3. 实例化滚动存储与共享令牌桶。
/// 4. 启动回填、实时轮询与维护三个后台任务。
/// 5. 挂起等待外部信号，广播关闭并等待任务退出。
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. 配置与日志
    let config = settings::load(Path::new(settings::CONFIG_PATH))?;
    let _log_guard = telemetry::init(&config.log);
    info!(
        "Kline service starting with {} symbols, window {}",
        config.market.symbols.len(),
        config.market.window_size
    );

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        error!("A TLS crypto provider was already installed");
    }

    // 2. 基础设施层
    kline_store::set_root_dir(PathBuf::from(&config.database.data_dir));
    let repo = Arc::new(SqliteChartStore::new()?);
    let provider = Arc::new(BinanceProvider::new(&config.provider)?);
    let clock: Arc<dyn TimeProvider> = Arc::new(RealTimeProvider);

    // 3. 滚动存储与限流
    let store = Arc::new(RollingStoreImpl::new(repo, &config.market));
    let limiter = Arc::new(TokenBucket::per_minute(
        config.backfill.requests_per_minute,
    ));

    // 4. 后台任务
    let backfill = Arc::new(BackfillOrchestrator::new(
        store.clone(),
        provider.clone(),
        clock.clone(),
        limiter.clone(),
        &config.backfill,
    ));
    let live = Arc::new(LiveIngestor::new(
        store.clone(),
        provider,
        clock.clone(),
        limiter,
        Duration::from_secs(config.market.live_poll_secs),
        config.backfill.fetch_timeout(),
    ));
    let maintenance = Arc::new(Maintenance::new(
        store,
        clock,
        config.market.retention(),
        Duration::from_secs(config.market.maintenance_interval_secs),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tasks = vec![
        tokio::spawn(backfill.run(shutdown_rx.clone())),
        tokio::spawn(live.run(shutdown_rx.clone())),
        tokio::spawn(maintenance.run(shutdown_rx)),
    ];
    info!("Background tasks started. Waiting for signals...");

    // 5. 等待退出信号
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Stopping tasks...");
    shutdown_tx.send(true)?;
    for task in tasks {
        if let Err(e) = task.await {
            error!("Background task aborted: {}", e);
        }
    }
    info!("Exited cleanly");

    Ok(())
}
