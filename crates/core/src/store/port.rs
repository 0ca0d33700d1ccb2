use super::error::StoreError;
use crate::chart::entity::ChartRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// # Summary
/// 图表记录仓储接口，按 (symbol, timestamp) 存取与区间删除。
///
/// # Invariants
/// - 同一 (symbol, timestamp) 至多一条记录，`put` 为 Upsert 语义。
/// - 所有返回列表按时间升序排列。
/// - 核心逻辑只依赖本接口，不依赖具体存储引擎。
#[async_trait]
pub trait ChartRepository: Send + Sync {
    /// # Summary
    /// 读取单条记录。
    ///
    /// # Arguments
    /// * `symbol`: 标的代码。
    /// * `timestamp`: 整分钟时间戳。
    ///
    /// # Returns
    /// 存在返回 `Some(ChartRecord)`，否则返回 `None`。
    async fn get(
        &self,
        symbol: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<ChartRecord>, StoreError>;

    /// # Summary
    /// 写入或覆盖一条记录。
    async fn put(&self, record: &ChartRecord) -> Result<(), StoreError>;

    /// # Summary
    /// 加载严格早于 `before` 的最近 `limit` 条记录。
    ///
    /// # Logic
    /// 1. 按时间倒序取前 `limit` 条。
    /// 2. 反转为升序返回。
    ///
    /// # Arguments
    /// * `symbol`: 标的代码。
    /// * `before`: 上界（不包含）。
    /// * `limit`: 数量上限。
    ///
    /// # Returns
    /// 升序记录列表。
    async fn load_before(
        &self,
        symbol: &str,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ChartRecord>, StoreError>;

    /// # Summary
    /// 加载最新的 `limit` 条记录，可选仅限完整记录。
    ///
    /// # Returns
    /// 升序记录列表。
    async fn load_latest(
        &self,
        symbol: &str,
        limit: usize,
        complete_only: bool,
    ) -> Result<Vec<ChartRecord>, StoreError>;

    /// # Summary
    /// 列出该标的所有已存储的时间戳（升序）。
    async fn timestamps(&self, symbol: &str) -> Result<Vec<DateTime<Utc>>, StoreError>;

    /// # Summary
    /// 统计该标的已存储的记录数。
    async fn count(&self, symbol: &str) -> Result<usize, StoreError>;

    /// # Summary
    /// 删除 `[start, end)` 区间内的记录。
    ///
    /// # Arguments
    /// * `symbol`: 标的代码。
    /// * `start`: 下界（包含），`None` 表示不设下界。
    /// * `end`: 上界（不包含）。
    ///
    /// # Returns
    /// 实际删除的记录数。
    async fn delete_range(
        &self,
        symbol: &str,
        start: Option<DateTime<Utc>>,
        end: DateTime<Utc>,
    ) -> Result<usize, StoreError>;
}
