use crate::limiter::TokenBucket;
use crate::rolling::RollingStoreImpl;
use futures::future::join_all;
use kline_core::chart::entity::ChartRecord;
use kline_core::common::time::TimeProvider;
use kline_core::common::{one_minute, truncate_to_minute};
use kline_core::market::port::MarketDataProvider;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

const INGEST_ATTEMPTS: u32 = 20;

/// # Summary
/// 实时行情轮询器：每个周期为所有标的抓取最近一根已收盘的一分钟 K 线并写入。
///
/// # Invariants
/// - 与回填调度器共享令牌桶，令牌不足的标的本周期跳过。
/// - 不同标的并行写入，同一标的通过构建锁串行。
pub struct LiveIngestor {
    store: Arc<RollingStoreImpl>,
    provider: Arc<dyn MarketDataProvider>,
    clock: Arc<dyn TimeProvider>,
    limiter: Arc<TokenBucket>,
    poll_interval: Duration,
    fetch_timeout: Duration,
}

impl LiveIngestor {
    pub fn new(
        store: Arc<RollingStoreImpl>,
        provider: Arc<dyn MarketDataProvider>,
        clock: Arc<dyn TimeProvider>,
        limiter: Arc<TokenBucket>,
        poll_interval: Duration,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            clock,
            limiter,
            poll_interval,
            fetch_timeout,
        }
    }

    /// # Summary
    /// 为单个标的抓取并写入上一分钟。
    ///
    /// # Logic
    /// 1. 计算 `[now - 1m, now)`（整分钟）。
    /// 2. 获取令牌，在超时保护下抓取。
    /// 3. 逐根写入，失败只记录日志。
    ///
    /// # Returns
    /// 成功写入的记录。
    async fn poll_symbol(&self, symbol: &str) -> Vec<ChartRecord> {
        let end = truncate_to_minute(self.clock.now());
        let start = end - one_minute();

        if !self.limiter.try_acquire() {
            debug!("Live poll for {} skipped: budget exhausted", symbol);
            return Vec::new();
        }

        let fetched = tokio::time::timeout(
            self.fetch_timeout,
            self.provider.fetch_candles(symbol, start, end),
        )
        .await;
        let candles = match fetched {
            Ok(Ok(candles)) => candles,
            Ok(Err(e)) => {
                warn!("Live fetch failed for {}: {}", symbol, e);
                return Vec::new();
            }
            Err(_) => {
                warn!("Live fetch timed out for {}", symbol);
                return Vec::new();
            }
        };

        let mut records = Vec::with_capacity(candles.len());
        for candle in candles {
            match self
                .store
                .ingest_with_retry(symbol, candle, INGEST_ATTEMPTS)
                .await
            {
                Ok(record) => records.push(record),
                Err(e) => warn!("Live ingest failed for {}: {}", symbol, e),
            }
        }
        records
    }

    /// # Summary
    /// 对全部标的并行执行一次轮询。
    pub async fn poll_once(&self) -> Vec<ChartRecord> {
        let symbols = self.store.symbols();
        join_all(symbols.iter().map(|s| self.poll_symbol(s)))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// 启动轮询循环，直到收到关闭信号。
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("Live ingestor started (poll every {:?})", self.poll_interval);
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let records = self.poll_once().await;
                    debug!("Live poll stored {} records", records.len());
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("Live ingestor stopped");
    }
}
