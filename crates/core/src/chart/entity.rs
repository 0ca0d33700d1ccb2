use crate::market::entity::Candle;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// # Summary
/// 市场结构标签，依据最近 10 个点的净涨跌幅划分。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketStructure {
    // 震荡 (|涨跌幅| < 2%)
    Range,
    // 趋势
    Trend,
    // 向上突破 (> +5%)
    Breakout,
    // 反转 (< -5%)
    Reversal,
}

impl MarketStructure {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketStructure::Range => "range",
            MarketStructure::Trend => "trend",
            MarketStructure::Breakout => "breakout",
            MarketStructure::Reversal => "reversal",
        }
    }
}

impl FromStr for MarketStructure {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "range" => Ok(MarketStructure::Range),
            "trend" => Ok(MarketStructure::Trend),
            "breakout" => Ok(MarketStructure::Breakout),
            "reversal" => Ok(MarketStructure::Reversal),
            _ => Err(format!("Unknown MarketStructure: {}", s)),
        }
    }
}

impl std::fmt::Display for MarketStructure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// # Summary
/// 单条记录上的技术指标集合。
///
/// # Invariants
/// - `None` 表示历史不足或占位记录，绝不使用伪造的中性值代替。
/// - 数值可能为 NaN/Inf（计算退化），由完整性校验负责拒绝。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub bollinger_upper: Option<f64>,
    pub bollinger_middle: Option<f64>,
    pub bollinger_lower: Option<f64>,
    pub stochastic_k: Option<f64>,
    pub stochastic_d: Option<f64>,
    // 全窗口年化已实现波动率
    pub realized_volatility: Option<f64>,
    pub volatility_5m: Option<f64>,
    pub volatility_15m: Option<f64>,
    pub volatility_60m: Option<f64>,
    pub support_level: Option<f64>,
    pub resistance_level: Option<f64>,
    pub market_structure: Option<MarketStructure>,
}

/// # Summary
/// 图表记录实体，每个 (symbol, 整分钟时间戳) 唯一一条。
///
/// # Invariants
/// - `timestamp` 的秒与毫秒必须为零。
/// - `is_complete = false` 的记录是占位数据，不会出现在权威窗口读取中。
/// - 完整记录满足 `bollinger_upper > bollinger_middle > bollinger_lower`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartRecord {
    // 标的代码
    pub symbol: String,
    // 整分钟时间戳
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    // 成交笔数 (支持后续补全)
    pub trade_count: Option<u64>,
    // 技术指标
    #[serde(flatten)]
    pub indicators: IndicatorSet,
    // 是否通过完整性校验
    pub is_complete: bool,
}

impl ChartRecord {
    /// # Summary
    /// 由 K 线与指标集合组装记录。
    ///
    /// # Logic
    /// 1. 价格按标的精度四舍五入，成交量保持原值。
    /// 2. 时间戳由调用方负责截断。
    ///
    /// # Arguments
    /// * `symbol`: 标的代码。
    /// * `timestamp`: 整分钟时间戳。
    /// * `candle`: 原始 K 线。
    /// * `price_scale`: 价格小数位数。
    /// * `indicators`: 指标集合。
    /// * `is_complete`: 完整性标记。
    ///
    /// # Returns
    /// 新的 ChartRecord。
    pub fn assemble(
        symbol: &str,
        timestamp: DateTime<Utc>,
        candle: &Candle,
        price_scale: u32,
        indicators: IndicatorSet,
        is_complete: bool,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            timestamp,
            open: candle.open.round_dp(price_scale),
            high: candle.high.round_dp(price_scale),
            low: candle.low.round_dp(price_scale),
            close: candle.close.round_dp(price_scale),
            volume: candle.volume,
            trade_count: candle.trade_count,
            indicators,
            is_complete,
        }
    }

    /// # Summary
    /// 构造占位记录：保留 OHLCV，指标全部为空，`is_complete = false`。
    pub fn placeholder(
        symbol: &str,
        timestamp: DateTime<Utc>,
        candle: &Candle,
        price_scale: u32,
    ) -> Self {
        Self::assemble(
            symbol,
            timestamp,
            candle,
            price_scale,
            IndicatorSet::default(),
            false,
        )
    }

    /// 还原为 K 线形式，用于作为指标计算的历史输入。
    pub fn to_candle(&self) -> Candle {
        Candle {
            time: self.timestamp,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            trade_count: self.trade_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn test_market_structure_roundtrip_str() {
        for s in [
            MarketStructure::Range,
            MarketStructure::Trend,
            MarketStructure::Breakout,
            MarketStructure::Reversal,
        ] {
            assert_eq!(s.as_str().parse::<MarketStructure>().unwrap(), s);
        }
        assert!("sideways".parse::<MarketStructure>().is_err());
    }

    #[test]
    fn test_placeholder_keeps_prices_rounded() {
        let time = Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap();
        let candle = Candle {
            time,
            open: dec!(100.12345),
            high: dec!(101.5),
            low: dec!(99.999),
            close: dec!(100.5),
            volume: dec!(12.5),
            trade_count: Some(7),
        };
        let record = ChartRecord::placeholder("BTCUSDT", time, &candle, 2);
        assert!(!record.is_complete);
        assert_eq!(record.open, dec!(100.12));
        assert_eq!(record.low, dec!(100.00));
        assert_eq!(record.indicators, IndicatorSet::default());
        assert_eq!(record.trade_count, Some(7));
    }

    #[test]
    fn test_record_serializes_flat() {
        let time = Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap();
        let candle = Candle {
            time,
            open: dec!(1),
            high: dec!(1),
            low: dec!(1),
            close: dec!(1),
            volume: dec!(1),
            trade_count: None,
        };
        let mut record = ChartRecord::placeholder("ETHUSDT", time, &candle, 2);
        record.indicators.market_structure = Some(MarketStructure::Breakout);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["market_structure"], "breakout");
        assert!(json["rsi"].is_null());
    }
}
