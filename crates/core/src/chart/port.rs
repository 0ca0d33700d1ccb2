use crate::chart::entity::ChartRecord;
use crate::chart::error::ChartError;
use crate::market::entity::Candle;
use async_trait::async_trait;

/// # Summary
/// 顺序滚动图表存储契约，系统对外暴露的两个核心操作。
///
/// # Invariants
/// - 每个标的同一时刻最多只有一个进行中的构建。
/// - 每个标的保留的记录数永远不超过窗口容量。
/// - 实时与回填两条路径共享同一个 `ingest` 入口。
#[async_trait]
pub trait RollingStore: Send + Sync {
    /// # Summary
    /// 写入一根一分钟 K 线并计算指标。
    ///
    /// # Logic
    /// 1. 时间戳截断到整分钟。
    /// 2. 通过顺序构建闸门判断是否允许构建。
    /// 3. 允许时计算指标、校验完整性并落库；否则写入或返回占位记录。
    /// 4. 插入后执行窗口容量维护。
    ///
    /// # Arguments
    /// * `symbol`: 标的代码。
    /// * `candle`: 一分钟 K 线。
    ///
    /// # Returns
    /// 成功返回落库后的记录；构建进行中返回 `ChartError::Busy`。
    async fn ingest(&self, symbol: &str, candle: Candle) -> Result<ChartRecord, ChartError>;

    /// # Summary
    /// 读取权威窗口。
    ///
    /// # Logic
    /// 1. 仅返回完整记录。
    /// 2. 按时间升序，长度不超过窗口容量。
    ///
    /// # Arguments
    /// * `symbol`: 标的代码。
    ///
    /// # Returns
    /// 记录列表；长度不足表示仍在预热，而非错误。
    async fn read_window(&self, symbol: &str) -> Result<Vec<ChartRecord>, ChartError>;
}
