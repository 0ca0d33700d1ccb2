use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};

pub mod time;

/// # Summary
/// 受支持的交易标的配置，定义价格精度与波动率兜底常量。
///
/// # Invariants
/// - `name` 必须属于审批通过的标的集合。
/// - `price_scale` 一般位于 2..=5 之间，取决于标的价格量级。
/// - `fallback_volatility` 必须为正数，仅在完全无法计算波动率时使用。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SymbolSpec {
    // 交易代码 (例如: BTCUSDT)
    pub name: String,
    // 价格小数位数
    pub price_scale: u32,
    // 年化波动率兜底常量
    pub fallback_volatility: f64,
}

impl SymbolSpec {
    pub fn new(name: impl Into<String>, price_scale: u32, fallback_volatility: f64) -> Self {
        Self {
            name: name.into(),
            price_scale,
            fallback_volatility,
        }
    }
}

/// # Summary
/// 一分钟时长常量。
pub fn one_minute() -> Duration {
    Duration::minutes(1)
}

/// # Summary
/// 将时间截断到整分钟（秒与毫秒归零）。
///
/// # Logic
/// 1. 使用 `duration_trunc` 按一分钟截断。
/// 2. 截断失败（超出表示范围）时退化为逐字段清零。
///
/// # Arguments
/// * `time`: 原始时间。
///
/// # Returns
/// 截断后的整分钟时间。
pub fn truncate_to_minute(time: DateTime<Utc>) -> DateTime<Utc> {
    time.duration_trunc(one_minute()).unwrap_or_else(|e| {
        tracing::warn!("Minute truncation of {} failed ({}), clearing fields", time, e);
        let secs = time.timestamp().div_euclid(60) * 60;
        DateTime::from_timestamp(secs, 0).unwrap_or(time)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_truncate_to_minute() {
        let t = Utc
            .with_ymd_and_hms(2026, 3, 1, 9, 30, 45)
            .unwrap()
            .checked_add_signed(Duration::milliseconds(250))
            .unwrap();
        let truncated = truncate_to_minute(t);
        assert_eq!(truncated, Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap());
        assert_eq!(truncate_to_minute(truncated), truncated);
    }
}
