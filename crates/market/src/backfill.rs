use crate::gap::{Gap, GapDetector, GapKind};
use crate::limiter::TokenBucket;
use crate::rolling::RollingStoreImpl;
use kline_core::chart::error::ChartError;
use kline_core::common::time::TimeProvider;
use kline_core::common::truncate_to_minute;
use kline_core::config::BackfillConfig;
use kline_core::market::entity::Candle;
use kline_core::market::error::MarketError;
use kline_core::market::port::MarketDataProvider;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

// 回填写入遇到构建竞争时的最大重试次数
const INGEST_ATTEMPTS: u32 = 5;

/// # Summary
/// 单次调度的结果。
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    // 令牌耗尽，本周期跳过
    RateLimited,
    // 所有标的均无缺口
    Idle,
    // 成功抓取并写入
    Filled {
        symbol: String,
        gap: Gap,
        inserted: usize,
        repaired: usize,
        skipped: usize,
    },
    // 上游失败，本周期无写入
    Failed { symbol: String, reason: String },
}

/// # Summary
/// 轮询式回填调度器：按固定周期轮转标的，发现缺口后从上游抓取并写入滚动存储。
///
/// # Invariants
/// - 每个周期至多发起一次上游请求。
/// - 上游请求在超时保护下执行，且从不在持有构建锁时等待网络。
/// - 抓取失败时本周期不产生任何写入。
pub struct BackfillOrchestrator {
    store: Arc<RollingStoreImpl>,
    provider: Arc<dyn MarketDataProvider>,
    clock: Arc<dyn TimeProvider>,
    limiter: Arc<TokenBucket>,
    detector: GapDetector,
    tick_interval: Duration,
    fetch_timeout: Duration,
    // 轮转游标
    cursor: AtomicUsize,
}

impl BackfillOrchestrator {
    /// # Summary
    /// 构造回填调度器。
    ///
    /// # Arguments
    /// * `store`: 滚动存储。
    /// * `provider`: 上游数据源。
    /// * `clock`: 时间供给器。
    /// * `limiter`: 与实时路径共享的令牌桶。
    /// * `config`: 回填配置。
    ///
    /// # Returns
    /// 新的调度器实例。
    pub fn new(
        store: Arc<RollingStoreImpl>,
        provider: Arc<dyn MarketDataProvider>,
        clock: Arc<dyn TimeProvider>,
        limiter: Arc<TokenBucket>,
        config: &BackfillConfig,
    ) -> Self {
        Self {
            store,
            provider,
            clock,
            limiter,
            detector: GapDetector::new(config.batch_width(), config.max_lookback()),
            tick_interval: config.tick_interval(),
            fetch_timeout: config.fetch_timeout(),
            cursor: AtomicUsize::new(0),
        }
    }

    /// # Summary
    /// 为单个标的寻找可执行的缺口。
    ///
    /// # Logic
    /// 1. 读取已存储时间戳并交给缺口探测器。
    /// 2. 窗口已满时忽略 `Preceding` 缺口，回填的旧数据会被立即淘汰。
    async fn find_gap(&self, symbol: &str) -> Result<Option<Gap>, ChartError> {
        let timestamps = self.store.timestamps(symbol).await?;
        let gap = self.detector.next_gap(&timestamps, self.clock.now());
        Ok(gap.filter(|g| {
            g.kind != GapKind::Preceding || timestamps.len() < self.store.window_size()
        }))
    }

    /// # Summary
    /// 执行一次调度。
    ///
    /// # Logic
    /// 1. 检查令牌桶，无可用令牌则跳过本周期。
    /// 2. 从游标位置开始轮转标的，找到第一个存在缺口的标的。
    /// 3. 扣减令牌，在超时保护下抓取该区间。
    /// 4. 抓取失败记录日志并结束本周期。
    /// 5. 成功则按时间升序写入，跳过已存在的完整记录。
    ///
    /// # Returns
    /// 本周期的执行结果。
    pub async fn tick(&self) -> TickOutcome {
        if let Some(wait) = self.limiter.delay_until_available() {
            debug!("Backfill budget exhausted, next token in {:?}", wait);
            return TickOutcome::RateLimited;
        }

        let symbols = self.store.symbols();
        if symbols.is_empty() {
            return TickOutcome::Idle;
        }

        for _ in 0..symbols.len() {
            let index = self.cursor.fetch_add(1, Ordering::Relaxed) % symbols.len();
            let symbol = &symbols[index];

            let gap = match self.find_gap(symbol).await {
                Ok(Some(gap)) => gap,
                Ok(None) => continue,
                Err(e) => {
                    error!("Gap detection failed for {}: {}", symbol, e);
                    continue;
                }
            };

            if !self.limiter.try_acquire() {
                return TickOutcome::RateLimited;
            }

            return match self.fetch(symbol, &gap).await {
                Ok(candles) => self.apply(symbol, gap, candles).await,
                Err(e) => {
                    warn!(
                        "Backfill fetch failed for {} [{}, {}): {}",
                        symbol, gap.start, gap.end, e
                    );
                    TickOutcome::Failed {
                        symbol: symbol.clone(),
                        reason: e.to_string(),
                    }
                }
            };
        }

        TickOutcome::Idle
    }

    async fn fetch(&self, symbol: &str, gap: &Gap) -> Result<Vec<Candle>, MarketError> {
        debug!(
            "Fetching {} [{}, {}) ({:?})",
            symbol, gap.start, gap.end, gap.kind
        );
        tokio::time::timeout(
            self.fetch_timeout,
            self.provider.fetch_candles(symbol, gap.start, gap.end),
        )
        .await
        .map_err(|_| MarketError::Timeout(self.fetch_timeout.as_secs()))?
    }

    /// # Summary
    /// 将抓取到的 K 线写入滚动存储。
    ///
    /// # Logic
    /// 1. 截断时间戳，丢弃区间外的数据，按时间升序去重。
    /// 2. 已存在的完整记录直接跳过，保持幂等。
    /// 3. 占位记录重新写入以尝试修复。
    /// 4. 写入失败时停止本批次。
    /// 5. 最早记录之前的批次受构建闸门约束只能写成占位记录，此时记录调试日志。
    async fn apply(&self, symbol: &str, gap: Gap, candles: Vec<Candle>) -> TickOutcome {
        let mut candles: Vec<Candle> = candles
            .into_iter()
            .map(|mut c| {
                c.time = truncate_to_minute(c.time);
                c
            })
            .filter(|c| c.time >= gap.start && c.time < gap.end)
            .collect();
        candles.sort_by_key(|c| c.time);
        candles.dedup_by_key(|c| c.time);

        let (mut inserted, mut repaired, mut skipped, mut complete) = (0, 0, 0, 0);
        for candle in candles {
            let existing = match self.store.record(symbol, candle.time).await {
                Ok(existing) => existing,
                Err(e) => {
                    error!("Backfill lookup failed for {}: {}", symbol, e);
                    break;
                }
            };
            if existing.as_ref().is_some_and(|r| r.is_complete) {
                skipped += 1;
                continue;
            }
            let time = candle.time;
            match self
                .store
                .ingest_with_retry(symbol, candle, INGEST_ATTEMPTS)
                .await
            {
                Ok(record) => {
                    complete += usize::from(record.is_complete);
                    if existing.is_some() {
                        repaired += 1;
                    } else {
                        inserted += 1;
                    }
                }
                Err(e) => {
                    error!("Backfill ingest failed for {} {}: {}", symbol, time, e);
                    break;
                }
            }
        }

        info!(
            "Backfilled {} [{}, {}): {} inserted, {} repaired, {} skipped",
            symbol, gap.start, gap.end, inserted, repaired, skipped
        );
        if gap.kind == GapKind::Preceding && inserted + repaired > 0 && complete == 0 {
            debug!(
                "Preceding batch {} [{}, {}) produced placeholders only; records stay out of the window",
                symbol, gap.start, gap.end
            );
        }
        TickOutcome::Filled {
            symbol: symbol.to_string(),
            gap,
            inserted,
            repaired,
            skipped,
        }
    }

    /// # Summary
    /// 启动调度循环，直到收到关闭信号。
    ///
    /// # Logic
    /// 1. 使用固定周期计时器，超时的周期允许执行完毕后再继续。
    /// 2. 关闭信号到达后退出循环。
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Backfill orchestrator started (tick every {:?})",
            self.tick_interval
        );
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let outcome = self.tick().await;
                    debug!("Backfill tick: {:?}", outcome);
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("Backfill orchestrator stopped");
    }
}
