//! 测试辅助工具：脚本化行情源与 K 线构造器，仅在 `test-utils` feature 下编译。

use crate::market::entity::Candle;
use crate::market::error::MarketError;
use crate::market::port::MarketDataProvider;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// # Summary
/// 以收盘价构造一根 K 线，最高/最低价在收盘价上下浮动 0.2%。
pub fn candle_at(time: DateTime<Utc>, close: f64) -> Candle {
    let to_dec = |v: f64| Decimal::from_f64(v).unwrap_or_default().round_dp(8);
    Candle {
        time,
        open: to_dec(close),
        high: to_dec(close * 1.002),
        low: to_dec(close * 0.998),
        close: to_dec(close),
        volume: Decimal::from(10),
        trade_count: None,
    }
}

/// # Summary
/// 生成 `count` 根连续的一分钟 K 线，价格由 `price_fn(i)` 给出。
pub fn minute_series(
    start: DateTime<Utc>,
    count: usize,
    price_fn: impl Fn(usize) -> f64,
) -> Vec<Candle> {
    (0..count)
        .map(|i| {
            let offset = i64::try_from(i).unwrap_or(i64::MAX);
            candle_at(start + Duration::minutes(offset), price_fn(i))
        })
        .collect()
}

/// # Summary
/// 脚本化行情源：返回预置 K 线中落在请求区间内的部分。
///
/// # Invariants
/// - 可注入前 N 次调用失败，用于验证失败路径不产生写入。
/// - 可注入固定延迟，用于验证超时。
pub struct ScriptedProvider {
    candles: Mutex<Vec<Candle>>,
    fail_next: AtomicUsize,
    delay: Option<std::time::Duration>,
    calls: AtomicUsize,
    ranges: Mutex<Vec<(String, DateTime<Utc>, DateTime<Utc>)>>,
}

impl ScriptedProvider {
    pub fn new(candles: Vec<Candle>) -> Self {
        Self {
            candles: Mutex::new(candles),
            fail_next: AtomicUsize::new(0),
            delay: None,
            calls: AtomicUsize::new(0),
            ranges: Mutex::new(Vec::new()),
        }
    }

    /// 每次抓取前等待固定时长
    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 令接下来的 `n` 次调用返回网络错误
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// 替换预置数据
    pub fn set_candles(&self, candles: Vec<Candle>) {
        *self.candles.lock().unwrap_or_else(|e| e.into_inner()) = candles;
    }

    /// 已发生的调用次数
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 已请求过的 (symbol, start, end) 列表
    pub fn requested_ranges(&self) -> Vec<(String, DateTime<Utc>, DateTime<Utc>)> {
        self.ranges.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl MarketDataProvider for ScriptedProvider {
    async fn fetch_candles(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, MarketError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.ranges
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((symbol.to_string(), start, end));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(MarketError::Network("scripted failure".into()));
        }

        let candles = self.candles.lock().unwrap_or_else(|e| e.into_inner());
        Ok(candles
            .iter()
            .filter(|c| c.time >= start && c.time < end)
            .cloned()
            .collect())
    }
}
