use crate::{indicator, validator};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use kline_core::chart::entity::ChartRecord;
use kline_core::chart::error::ChartError;
use kline_core::chart::port::RollingStore;
use kline_core::common::{SymbolSpec, one_minute, truncate_to_minute};
use kline_core::config::MarketConfig;
use kline_core::market::entity::Candle;
use kline_core::store::port::ChartRepository;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// # Summary
/// 单个标的的构建状态。
///
/// # Invariants
/// - `build` 锁即顺序构建闸门：持锁即 Building，未持锁即 Idle。
/// - `last_completed` 只允许单调前进。
pub struct SymbolState {
    // 构建锁，仅在指标计算与落库期间持有
    build: tokio::sync::Mutex<()>,
    // 最近一个完整分钟
    last_completed: RwLock<Option<DateTime<Utc>>>,
    // 是否已从持久层恢复过标记
    warmed: AtomicBool,
}

impl SymbolState {
    fn new() -> Self {
        Self {
            build: tokio::sync::Mutex::new(()),
            last_completed: RwLock::new(None),
            warmed: AtomicBool::new(false),
        }
    }

    pub fn last_completed(&self) -> Option<DateTime<Utc>> {
        *self.last_completed.read().unwrap_or_else(|e| e.into_inner())
    }

    /// 仅当 `t` 晚于当前标记时前进
    fn advance(&self, t: DateTime<Utc>) {
        let mut marker = self
            .last_completed
            .write()
            .unwrap_or_else(|e| e.into_inner());
        if marker.is_none_or(|m| t > m) {
            *marker = Some(t);
        }
    }
}

/// # Summary
/// 标的存储概况。
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolStats {
    pub total: usize,
    pub complete: usize,
    pub last_completed: Option<DateTime<Utc>>,
}

/// # Summary
/// 顺序滚动图表存储的具体实现。
///
/// # Invariants
/// - 维护 Symbol 到 `SymbolState` 的并发映射，不使用任何全局状态。
/// - 未在配置中列出的标的一律拒绝。
/// - 每次新增记录后执行窗口维护，保证记录数不超过 `window_size`。
pub struct RollingStoreImpl {
    // 持久化仓储
    repo: Arc<dyn ChartRepository>,
    // 审批通过的标的（保持配置顺序）
    symbols: Vec<SymbolSpec>,
    // 每个标的的最大记录数
    window_size: usize,
    // 标的状态注册表
    states: DashMap<String, Arc<SymbolState>>,
}

impl RollingStoreImpl {
    /// # Summary
    /// 创建滚动存储实例。
    ///
    /// # Arguments
    /// * `repo`: 满足 ChartRepository 接口的仓储。
    /// * `config`: 标的集合与窗口容量配置。
    ///
    /// # Returns
    /// 新的 RollingStoreImpl。
    pub fn new(repo: Arc<dyn ChartRepository>, config: &MarketConfig) -> Self {
        Self {
            repo,
            symbols: config.symbols.clone(),
            window_size: config.window_size.max(1),
            states: DashMap::new(),
        }
    }

    pub fn symbols(&self) -> Vec<String> {
        self.symbols.iter().map(|s| s.name.clone()).collect()
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    fn spec(&self, symbol: &str) -> Result<&SymbolSpec, ChartError> {
        self.symbols
            .iter()
            .find(|s| s.name == symbol)
            .ok_or_else(|| ChartError::UnknownSymbol(symbol.to_string()))
    }

    fn state(&self, symbol: &str) -> Arc<SymbolState> {
        self.states
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(SymbolState::new()))
            .clone()
    }

    /// 当前的“最近完整分钟”标记
    pub fn last_completed(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.states.get(symbol).and_then(|s| s.last_completed())
    }

    /// # Summary
    /// 首次访问标的时，从持久层最新的完整记录恢复标记。
    ///
    /// # Logic
    /// 1. 已恢复过则直接返回。
    /// 2. 读取最新一条完整记录，以其时间戳推进标记。
    async fn warm_up(&self, symbol: &str, state: &SymbolState) -> Result<(), ChartError> {
        if state.warmed.load(Ordering::Acquire) {
            return Ok(());
        }
        if let Some(latest) = self.repo.load_latest(symbol, 1, true).await?.pop() {
            info!(
                "Restored last completed minute for {}: {}",
                symbol, latest.timestamp
            );
            state.advance(latest.timestamp);
        }
        state.warmed.store(true, Ordering::Release);
        Ok(())
    }

    /// # Summary
    /// 带轮询重试的写入，供实时与回填路径使用。
    ///
    /// # Logic
    /// 1. 调用 `ingest`。
    /// 2. 遇到 `Busy` 时按线性退避等待后重试，最多 `attempts` 次。
    /// 3. 其余错误直接返回。
    pub async fn ingest_with_retry(
        &self,
        symbol: &str,
        candle: Candle,
        attempts: u32,
    ) -> Result<ChartRecord, ChartError> {
        let mut attempt: u32 = 0;
        loop {
            match self.ingest(symbol, candle.clone()).await {
                Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                    attempt += 1;
                    debug!("{} busy, retry #{}", symbol, attempt);
                    tokio::time::sleep(Duration::from_millis(25 * u64::from(attempt))).await;
                }
                other => return other,
            }
        }
    }

    /// # Summary
    /// 窗口维护：记录数超过容量时删除最旧的记录，直到恰好等于容量。
    ///
    /// # Returns
    /// 删除的记录数。
    pub async fn trim_window(&self, symbol: &str) -> Result<usize, ChartError> {
        let count = self.repo.count(symbol).await?;
        if count <= self.window_size {
            return Ok(0);
        }
        let timestamps = self.repo.timestamps(symbol).await?;
        let Some(first_kept) = timestamps
            .len()
            .checked_sub(self.window_size)
            .and_then(|i| timestamps.get(i))
        else {
            return Ok(0);
        };
        let deleted = self.repo.delete_range(symbol, None, *first_kept).await?;
        debug!("Evicted {} records for {}", deleted, symbol);
        Ok(deleted)
    }

    /// 删除早于 `cutoff` 的记录，与窗口容量无关。
    pub async fn purge_older_than(
        &self,
        symbol: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, ChartError> {
        Ok(self.repo.delete_range(symbol, None, cutoff).await?)
    }

    /// 读取单条记录（含占位记录）
    pub async fn record(
        &self,
        symbol: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<ChartRecord>, ChartError> {
        Ok(self
            .repo
            .get(symbol, truncate_to_minute(timestamp))
            .await?)
    }

    /// 已存储的时间戳（升序，含占位记录）
    pub async fn timestamps(&self, symbol: &str) -> Result<Vec<DateTime<Utc>>, ChartError> {
        Ok(self.repo.timestamps(symbol).await?)
    }

    /// # Summary
    /// 统计标的存储概况。
    pub async fn symbol_stats(&self, symbol: &str) -> Result<SymbolStats, ChartError> {
        self.spec(symbol)?;
        let total = self.repo.count(symbol).await?;
        let complete = self
            .repo
            .load_latest(symbol, self.window_size, true)
            .await?
            .len();
        Ok(SymbolStats {
            total,
            complete,
            last_completed: self.last_completed(symbol),
        })
    }
}

#[async_trait]
impl RollingStore for RollingStoreImpl {
    /// # Summary
    /// 写入一根一分钟 K 线。
    ///
    /// # Logic
    /// 1. 校验标的并截断时间戳。
    /// 2. 尝试获取构建锁，失败返回 `Busy`。
    /// 3. 已有完整分钟时检查 `t - 1` 是否存在且完整；否则写入占位记录（或原样返回已有记录）。
    /// 4. 以 `t` 之前的历史计算指标并校验，Upsert 落库。
    /// 5. 记录完整时单调推进标记。
    /// 6. 释放构建锁后，若为新增记录则执行窗口维护。
    ///
    /// # Arguments
    /// * `symbol`: 标的代码。
    /// * `candle`: 一分钟 K 线。
    ///
    /// # Returns
    /// 落库后的记录。
    async fn ingest(&self, symbol: &str, candle: Candle) -> Result<ChartRecord, ChartError> {
        let spec = self.spec(symbol)?.clone();
        let timestamp = truncate_to_minute(candle.time);
        let state = self.state(symbol);

        let Ok(guard) = state.build.try_lock() else {
            debug!("Build in progress for {}, rejecting {}", symbol, timestamp);
            return Err(ChartError::Busy(symbol.to_string()));
        };

        self.warm_up(symbol, &state).await?;
        let existing = self.repo.get(symbol, timestamp).await?;
        let base = ChartRecord::placeholder(symbol, timestamp, &candle, spec.price_scale);

        if state.last_completed().is_some() {
            let previous = self.repo.get(symbol, timestamp - one_minute()).await?;
            if !previous.is_some_and(|r| r.is_complete) {
                warn!(
                    symbol,
                    %timestamp,
                    "Previous minute missing or incomplete, build blocked"
                );
                if let Some(record) = existing {
                    return Ok(record);
                }
                self.repo.put(&base).await?;
                drop(guard);
                self.trim_window(symbol).await?;
                return Ok(base);
            }
        }

        let history: Vec<Candle> = self
            .repo
            .load_before(symbol, timestamp, self.window_size)
            .await?
            .iter()
            .map(ChartRecord::to_candle)
            .collect();
        let normalized = base.to_candle();
        let indicators = indicator::compute(&history, &normalized, &spec);
        let is_complete = match validator::validate(&normalized, &indicators) {
            Ok(()) => true,
            Err(field) => {
                warn!(symbol, %timestamp, %field, "Record persisted as incomplete");
                false
            }
        };

        let mut record = ChartRecord {
            indicators,
            is_complete,
            ..base
        };
        if record.trade_count.is_none() {
            record.trade_count = existing.as_ref().and_then(|r| r.trade_count);
        }
        self.repo.put(&record).await?;
        if is_complete {
            state.advance(timestamp);
        }
        drop(guard);

        debug!(
            "Built {} {} (complete: {}, rsi: {:?})",
            symbol, timestamp, record.is_complete, record.indicators.rsi
        );
        if existing.is_none() {
            self.trim_window(symbol).await?;
        }
        Ok(record)
    }

    /// # Summary
    /// 读取权威窗口：最新的完整记录，升序，至多 `window_size` 条。
    async fn read_window(&self, symbol: &str) -> Result<Vec<ChartRecord>, ChartError> {
        self.spec(symbol)?;
        let window = self
            .repo
            .load_latest(symbol, self.window_size, true)
            .await?;
        debug_assert!(window.len() <= self.window_size);
        Ok(window)
    }
}
