use kline_core::chart::entity::IndicatorSet;
use kline_core::market::entity::Candle;
use rust_decimal::Decimal;

// 波动率的合理上限，超过即视为计算损坏
pub const VOLATILITY_CEILING: f64 = 2.0;

/// # Summary
/// 完整性校验失败的具体字段。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncompleteField {
    Ohlcv,
    Volatility,
    Macd,
    Bollinger,
    BollingerOrder,
    Stochastic,
    Rsi,
}

impl std::fmt::Display for IncompleteField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            IncompleteField::Ohlcv => "ohlcv",
            IncompleteField::Volatility => "realized_volatility",
            IncompleteField::Macd => "macd",
            IncompleteField::Bollinger => "bollinger",
            IncompleteField::BollingerOrder => "bollinger_order",
            IncompleteField::Stochastic => "stochastic",
            IncompleteField::Rsi => "rsi",
        };
        f.write_str(name)
    }
}

fn finite(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite())
}

/// # Summary
/// 判定一组指标是否“完整”。
///
/// # Logic
/// 1. OHLCV 全部为正。
/// 2. 波动率为有限正数且不超过上限。
/// 3. MACD 为有限数（零合法）。
/// 4. 布林带三值有限且满足上轨 > 中轨 > 下轨。
/// 5. 随机指标 %K/%D 为 [0, 100] 内的有限数。
/// 6. RSI 可以为空（历史不足），但若存在必须位于 [0, 100]。
///
/// # Arguments
/// * `candle`: 原始 K 线。
/// * `set`: 计算得到的指标。
///
/// # Returns
/// 完整返回 `Ok(())`，否则返回第一个失败的字段。
pub fn validate(candle: &Candle, set: &IndicatorSet) -> Result<(), IncompleteField> {
    let ohlcv = [candle.open, candle.high, candle.low, candle.close, candle.volume];
    if ohlcv.iter().any(|v| *v <= Decimal::ZERO) {
        return Err(IncompleteField::Ohlcv);
    }

    match finite(set.realized_volatility) {
        Some(v) if v > 0.0 && v <= VOLATILITY_CEILING => {}
        _ => return Err(IncompleteField::Volatility),
    }

    if finite(set.macd).is_none() {
        return Err(IncompleteField::Macd);
    }

    let (Some(upper), Some(middle), Some(lower)) = (
        finite(set.bollinger_upper),
        finite(set.bollinger_middle),
        finite(set.bollinger_lower),
    ) else {
        return Err(IncompleteField::Bollinger);
    };
    if !(upper > middle && middle > lower) {
        return Err(IncompleteField::BollingerOrder);
    }

    let in_percent = |v: Option<f64>| finite(v).is_some_and(|x| (0.0..=100.0).contains(&x));
    if !in_percent(set.stochastic_k) || !in_percent(set.stochastic_d) {
        return Err(IncompleteField::Stochastic);
    }

    if let Some(rsi) = set.rsi
        && !(rsi.is_finite() && (0.0..=100.0).contains(&rsi))
    {
        return Err(IncompleteField::Rsi);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn candle() -> Candle {
        Candle {
            time: Utc::now(),
            open: dec!(100),
            high: dec!(101),
            low: dec!(99),
            close: dec!(100.5),
            volume: dec!(3),
            trade_count: None,
        }
    }

    fn complete_set() -> IndicatorSet {
        IndicatorSet {
            rsi: None,
            macd: Some(0.0),
            macd_signal: Some(0.0),
            macd_histogram: Some(0.0),
            bollinger_upper: Some(102.0),
            bollinger_middle: Some(100.0),
            bollinger_lower: Some(98.0),
            stochastic_k: Some(100.0),
            stochastic_d: Some(0.0),
            realized_volatility: Some(0.2),
            ..IndicatorSet::default()
        }
    }

    #[test]
    fn test_complete_with_null_rsi() {
        assert_eq!(validate(&candle(), &complete_set()), Ok(()));
    }

    #[test]
    fn test_zero_volume_is_incomplete() {
        let mut c = candle();
        c.volume = Decimal::ZERO;
        assert_eq!(validate(&c, &complete_set()), Err(IncompleteField::Ohlcv));
    }

    #[test]
    fn test_volatility_rules() {
        for bad in [None, Some(0.0), Some(f64::NAN), Some(2.5)] {
            let set = IndicatorSet {
                realized_volatility: bad,
                ..complete_set()
            };
            assert_eq!(validate(&candle(), &set), Err(IncompleteField::Volatility));
        }
    }

    #[test]
    fn test_macd_nan_is_incomplete() {
        let set = IndicatorSet {
            macd: Some(f64::NAN),
            ..complete_set()
        };
        assert_eq!(validate(&candle(), &set), Err(IncompleteField::Macd));
    }

    #[test]
    fn test_bollinger_order() {
        let set = IndicatorSet {
            bollinger_upper: Some(100.0),
            ..complete_set()
        };
        assert_eq!(
            validate(&candle(), &set),
            Err(IncompleteField::BollingerOrder)
        );
        // 零波动的满窗口三轨重合
        let set = IndicatorSet {
            bollinger_upper: Some(100.0),
            bollinger_lower: Some(100.0),
            ..complete_set()
        };
        assert_eq!(
            validate(&candle(), &set),
            Err(IncompleteField::BollingerOrder)
        );
        let set = IndicatorSet {
            bollinger_lower: None,
            ..complete_set()
        };
        assert_eq!(validate(&candle(), &set), Err(IncompleteField::Bollinger));
    }

    #[test]
    fn test_stochastic_missing_or_out_of_range() {
        let set = IndicatorSet {
            stochastic_d: None,
            ..complete_set()
        };
        assert_eq!(validate(&candle(), &set), Err(IncompleteField::Stochastic));
        let set = IndicatorSet {
            stochastic_k: Some(100.5),
            ..complete_set()
        };
        assert_eq!(validate(&candle(), &set), Err(IncompleteField::Stochastic));
    }

    #[test]
    fn test_rsi_out_of_range() {
        let set = IndicatorSet {
            rsi: Some(f64::INFINITY),
            ..complete_set()
        };
        assert_eq!(validate(&candle(), &set), Err(IncompleteField::Rsi));
    }
}
