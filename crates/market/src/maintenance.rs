use crate::rolling::RollingStoreImpl;
use chrono::Duration as ChronoDuration;
use kline_core::common::time::TimeProvider;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

/// # Summary
/// 单次维护的统计结果。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    // 因超过保留期被清理的记录数
    pub purged: usize,
    // 因超过窗口容量被淘汰的记录数
    pub evicted: usize,
}

/// # Summary
/// 周期性维护任务：保留期清理与窗口容量修剪。
///
/// # Invariants
/// - 只删除最旧的数据，从不触碰正在构建的最新记录，因此无需持有构建锁。
pub struct Maintenance {
    store: Arc<RollingStoreImpl>,
    clock: Arc<dyn TimeProvider>,
    retention: ChronoDuration,
    interval: Duration,
}

impl Maintenance {
    pub fn new(
        store: Arc<RollingStoreImpl>,
        clock: Arc<dyn TimeProvider>,
        retention: ChronoDuration,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            retention,
            interval,
        }
    }

    /// # Summary
    /// 对所有标的执行一次维护。
    ///
    /// # Logic
    /// 1. 删除早于 `now - retention` 的记录。
    /// 2. 修剪超出窗口容量的最旧记录。
    /// 3. 单个标的失败只记录日志，不影响其余标的。
    pub async fn run_once(&self) -> MaintenanceReport {
        let cutoff = self.clock.now() - self.retention;
        let mut report = MaintenanceReport::default();

        for symbol in self.store.symbols() {
            match self.store.purge_older_than(&symbol, cutoff).await {
                Ok(n) => report.purged += n,
                Err(e) => error!("Retention purge failed for {}: {}", symbol, e),
            }
            match self.store.trim_window(&symbol).await {
                Ok(n) => report.evicted += n,
                Err(e) => error!("Window trim failed for {}: {}", symbol, e),
            }
            if let Ok(stats) = self.store.symbol_stats(&symbol).await {
                info!(
                    "{}: {} records ({} complete), last completed {:?}",
                    symbol, stats.total, stats.complete, stats.last_completed
                );
            }
        }
        report
    }

    /// 启动维护循环，直到收到关闭信号。
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.run_once().await;
                    info!("Maintenance: purged {}, evicted {}", report.purged, report.evicted);
                }
                _ = shutdown.changed() => break,
            }
        }
    }
}
