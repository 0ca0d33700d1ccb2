use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use kline_core::chart::entity::ChartRecord;
use kline_core::store::error::StoreError;
use kline_core::store::port::ChartRepository;
use std::collections::BTreeMap;

/// # Summary
/// 基于 DashMap 的内存图表仓储，供测试与无持久化部署使用。
///
/// # Invariants
/// - 每个标的一棵按时间戳排序的 `BTreeMap`，键唯一。
/// - 进程退出后数据不保留。
pub struct MemChartStore {
    records: DashMap<String, BTreeMap<DateTime<Utc>, ChartRecord>>,
}

impl MemChartStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }
}

impl Default for MemChartStore {
    fn default() -> Self {
        Self::new()
    }
}

/// 取有序序列的最后 `limit` 个元素，保持升序。
fn tail(mut items: Vec<ChartRecord>, limit: usize) -> Vec<ChartRecord> {
    let skip = items.len().saturating_sub(limit);
    items.drain(..skip);
    items
}

#[async_trait]
impl ChartRepository for MemChartStore {
    async fn get(
        &self,
        symbol: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<ChartRecord>, StoreError> {
        Ok(self
            .records
            .get(symbol)
            .and_then(|series| series.get(&timestamp).cloned()))
    }

    async fn put(&self, record: &ChartRecord) -> Result<(), StoreError> {
        self.records
            .entry(record.symbol.clone())
            .or_default()
            .insert(record.timestamp, record.clone());
        Ok(())
    }

    async fn load_before(
        &self,
        symbol: &str,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ChartRecord>, StoreError> {
        let Some(series) = self.records.get(symbol) else {
            return Ok(Vec::new());
        };
        let items = series.range(..before).map(|(_, r)| r.clone()).collect();
        Ok(tail(items, limit))
    }

    async fn load_latest(
        &self,
        symbol: &str,
        limit: usize,
        complete_only: bool,
    ) -> Result<Vec<ChartRecord>, StoreError> {
        let Some(series) = self.records.get(symbol) else {
            return Ok(Vec::new());
        };
        let items = series
            .values()
            .filter(|r| !complete_only || r.is_complete)
            .cloned()
            .collect();
        Ok(tail(items, limit))
    }

    async fn timestamps(&self, symbol: &str) -> Result<Vec<DateTime<Utc>>, StoreError> {
        Ok(self
            .records
            .get(symbol)
            .map(|series| series.keys().copied().collect())
            .unwrap_or_default())
    }

    async fn count(&self, symbol: &str) -> Result<usize, StoreError> {
        Ok(self.records.get(symbol).map_or(0, |series| series.len()))
    }

    async fn delete_range(
        &self,
        symbol: &str,
        start: Option<DateTime<Utc>>,
        end: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let Some(mut series) = self.records.get_mut(symbol) else {
            return Ok(0);
        };
        let before = series.len();
        series.retain(|ts, _| start.is_some_and(|s| *ts < s) || *ts >= end);
        Ok(before - series.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use kline_core::test_utils::candle_at;

    fn record(minute: i64, complete: bool) -> ChartRecord {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute);
        let mut r = ChartRecord::placeholder("BTCUSDT", ts, &candle_at(ts, 100.0), 2);
        r.is_complete = complete;
        r
    }

    #[tokio::test]
    async fn test_latest_filters_and_keeps_order() {
        let store = MemChartStore::new();
        for (m, complete) in [(0, true), (1, false), (2, true), (3, true)] {
            store.put(&record(m, complete)).await.unwrap();
        }

        let latest = store.load_latest("BTCUSDT", 2, true).await.unwrap();
        let minutes: Vec<_> = latest.iter().map(|r| r.timestamp).collect();
        assert_eq!(minutes, vec![record(2, true).timestamp, record(3, true).timestamp]);

        let before = store
            .load_before("BTCUSDT", record(3, true).timestamp, 10)
            .await
            .unwrap();
        assert_eq!(before.len(), 3);
    }

    #[tokio::test]
    async fn test_delete_range_is_half_open() {
        let store = MemChartStore::new();
        for m in 0..5 {
            store.put(&record(m, true)).await.unwrap();
        }
        let removed = store
            .delete_range("BTCUSDT", Some(record(1, true).timestamp), record(3, true).timestamp)
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.count("BTCUSDT").await.unwrap(), 3);

        let removed = store
            .delete_range("BTCUSDT", None, record(4, true).timestamp)
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.count("UNKNOWN").await.unwrap(), 0);
    }
}
