use crate::market::entity::Candle;
use crate::market::error::MarketError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// # Summary
/// 市场行情数据提供者接口（外部原始数据源）。
///
/// # Invariants
/// - 实现者被视为不可靠且受限流约束的协作方。
/// - 任意时间区间返回空列表都是合法结果。
/// - 实现必须可替换，测试中使用脚本化的模拟实现。
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// # Summary
    /// 获取特定标的在 `[start, end)` 区间内的一分钟 K 线。
    ///
    /// # Logic
    /// 1. 构建数据源请求。
    /// 2. 执行网络请求并解析 `[timestampMillis, open, high, low, close, volume]` 数组。
    ///
    /// # Arguments
    /// * `symbol`: 标的代码。
    /// * `start`: 开始时间（包含）。
    /// * `end`: 结束时间（不包含）。
    ///
    /// # Returns
    /// 成功返回 K 线列表，失败返回 MarketError。
    async fn fetch_candles(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, MarketError>;
}
