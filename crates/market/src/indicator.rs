use kline_core::chart::entity::{IndicatorSet, MarketStructure};
use kline_core::common::SymbolSpec;
use kline_core::market::entity::Candle;
use rust_decimal::prelude::ToPrimitive;

pub const RSI_PERIOD: usize = 14;
pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;
pub const MACD_SIGNAL: usize = 9;
pub const BOLLINGER_PERIOD: usize = 20;
pub const BOLLINGER_K: f64 = 2.0;
pub const STOCH_PERIOD: usize = 14;
pub const STOCH_D_PERIOD: usize = 3;
pub const STRUCTURE_LOOKBACK: usize = 10;
pub const SR_LOOKBACK: usize = 100;

// 一年的分钟数，用于年化分钟级对数收益率的标准差
pub const MINUTES_PER_YEAR: f64 = 525_600.0;
pub const VOLATILITY_FLOOR: f64 = 0.001;
pub const VOLATILITY_CAP: f64 = 0.5;

// 历史不足时的 ±2% 兜底带宽
const SHORT_HISTORY_BAND: f64 = 0.02;

#[allow(clippy::cast_precision_loss)]
fn len_f64(n: usize) -> f64 {
    n as f64
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / len_f64(values.len())
}

fn round_to(value: f64, scale: u32) -> f64 {
    let factor = 10f64.powi(i32::try_from(scale).unwrap_or(8));
    (value * factor).round() / factor
}

/// # Summary
/// 指标计算入口：基于按时间升序排列的历史 K 线与新 K 线生成完整指标集合。
///
/// # Logic
/// 1. 将历史与新 K 线拼接为收盘/最高/最低价序列（新 K 线位于末尾）。
/// 2. 逐项计算 RSI、MACD、布林带、随机指标、波动率、支撑阻力与市场结构。
/// 3. 价格类指标按标的精度取整。
///
/// # Arguments
/// * `history`: 新 K 线之前的历史（旧 → 新）。
/// * `candle`: 新 K 线。
/// * `spec`: 标的配置，提供精度与波动率兜底常量。
///
/// # Returns
/// 确定性的指标集合，无副作用。
pub fn compute(history: &[Candle], candle: &Candle, spec: &SymbolSpec) -> IndicatorSet {
    let series = || history.iter().chain(std::iter::once(candle));
    let to_f64 = |d: rust_decimal::Decimal| d.to_f64().unwrap_or(f64::NAN);
    let closes: Vec<f64> = series().map(|c| to_f64(c.close)).collect();
    let highs: Vec<f64> = series().map(|c| to_f64(c.high)).collect();
    let lows: Vec<f64> = series().map(|c| to_f64(c.low)).collect();

    let scale = spec.price_scale;
    let (macd_line, macd_signal, macd_histogram) = match macd(&closes) {
        Some((m, s, h)) => (Some(m), Some(s), Some(h)),
        None => (None, None, None),
    };
    let (bb_upper, bb_middle, bb_lower) = match bollinger(&closes) {
        Some((u, m, l)) => (
            Some(round_to(u, scale)),
            Some(round_to(m, scale)),
            Some(round_to(l, scale)),
        ),
        None => (None, None, None),
    };
    let (stoch_k, stoch_d) = match stochastic(&highs, &lows, &closes) {
        Some((k, d)) => (Some(k), Some(d)),
        None => (None, None),
    };
    let (support, resistance) = match support_resistance(&closes) {
        Some((s, r)) => (Some(round_to(s, scale)), Some(round_to(r, scale))),
        None => (None, None),
    };

    IndicatorSet {
        rsi: rsi(&closes),
        macd: macd_line,
        macd_signal,
        macd_histogram,
        bollinger_upper: bb_upper,
        bollinger_middle: bb_middle,
        bollinger_lower: bb_lower,
        stochastic_k: stoch_k,
        stochastic_d: stoch_d,
        realized_volatility: Some(
            realized_volatility(&closes).unwrap_or(spec.fallback_volatility),
        ),
        volatility_5m: windowed_volatility(&closes, 5),
        volatility_15m: windowed_volatility(&closes, 15),
        volatility_60m: windowed_volatility(&closes, 60),
        support_level: support,
        resistance_level: resistance,
        market_structure: (!closes.is_empty()).then(|| market_structure(&closes)),
    }
}

/// # Summary
/// RSI(14)：最近 14 次价格变动的平均涨幅与平均跌幅之比。
///
/// # Logic
/// 1. 少于 15 个价格点返回 None，不伪造中性值。
/// 2. 平均跌幅为 0 返回 100；平均涨幅为 0 返回 0。
/// 3. 否则 `100 - 100 / (1 + avgGain / avgLoss)`。
pub fn rsi(closes: &[f64]) -> Option<f64> {
    if closes.len() < RSI_PERIOD + 1 {
        return None;
    }
    let window = &closes[closes.len() - RSI_PERIOD - 1..];
    let (gains, losses) = window
        .windows(2)
        .map(|w| w[1] - w[0])
        .fold((0.0, 0.0), |(g, l), change| {
            if change > 0.0 {
                (g + change, l)
            } else {
                (g, l - change)
            }
        });
    let avg_gain = gains / len_f64(RSI_PERIOD);
    let avg_loss = losses / len_f64(RSI_PERIOD);

    if avg_loss == 0.0 {
        return Some(100.0);
    }
    if avg_gain == 0.0 {
        return Some(0.0);
    }
    Some(100.0 - 100.0 / (1.0 + avg_gain / avg_loss))
}

/// 以首个值为种子的 EMA 序列。
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    let alpha = 2.0 / (len_f64(period) + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev: Option<f64> = None;
    for &v in values {
        let next = match prev {
            None => v,
            Some(p) => alpha * v + (1.0 - alpha) * p,
        };
        out.push(next);
        prev = Some(next);
    }
    out
}

/// # Summary
/// MACD(12, 26, 9)：返回 (MACD, Signal, Histogram)。
///
/// # Logic
/// 1. MACD 序列 = EMA(12) - EMA(26)。
/// 2. Signal = MACD 序列的 EMA(9)。
/// 3. Histogram = MACD - Signal。
pub fn macd(closes: &[f64]) -> Option<(f64, f64, f64)> {
    if closes.is_empty() {
        return None;
    }
    let fast = ema_series(closes, MACD_FAST);
    let slow = ema_series(closes, MACD_SLOW);
    let line: Vec<f64> = fast.iter().zip(&slow).map(|(f, s)| f - s).collect();
    let signal = ema_series(&line, MACD_SIGNAL);
    let m = *line.last()?;
    let s = *signal.last()?;
    Some((m, s, m - s))
}

/// # Summary
/// 布林带(20, 2σ)：返回 (上轨, 中轨, 下轨)。
///
/// # Logic
/// 1. 满 20 个点：最近 20 个收盘价的简单均值 ± 2 倍总体标准差。
/// 2. 不足 20 个点：均值 ± 2%。
/// 3. 满窗口且标准差为 0 时三轨重合，交由校验器拒绝，不伪造带宽。
pub fn bollinger(closes: &[f64]) -> Option<(f64, f64, f64)> {
    if closes.is_empty() {
        return None;
    }
    let window = &closes[closes.len().saturating_sub(BOLLINGER_PERIOD)..];
    let middle = mean(window);
    if window.len() < BOLLINGER_PERIOD {
        return Some(short_history_band(middle));
    }
    let variance =
        window.iter().map(|c| (c - middle).powi(2)).sum::<f64>() / len_f64(window.len());
    let std_dev = variance.sqrt();
    Some((
        middle + BOLLINGER_K * std_dev,
        middle,
        middle - BOLLINGER_K * std_dev,
    ))
}

fn short_history_band(middle: f64) -> (f64, f64, f64) {
    (
        middle * (1.0 + SHORT_HISTORY_BAND),
        middle,
        middle * (1.0 - SHORT_HISTORY_BAND),
    )
}

/// 单个终点的 %K，`end` 为切片上界（不包含）。
fn percent_k(highs: &[f64], lows: &[f64], closes: &[f64], end: usize) -> f64 {
    let start = end - STOCH_PERIOD;
    let highest = highs[start..end]
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);
    let lowest = lows[start..end].iter().copied().fold(f64::INFINITY, f64::min);
    let close = closes[end - 1];
    if highest == lowest {
        // 区间振幅为零的真实边界情况，而非数据缺失
        return 50.0;
    }
    ((close - lowest) / (highest - lowest) * 100.0).clamp(0.0, 100.0)
}

/// # Summary
/// 随机指标(14, 3)：返回 (%K, %D)。
///
/// # Logic
/// 1. 少于 14 个点返回 None。
/// 2. %K 使用最近 14 根的最高价/最低价，裁剪到 [0, 100]。
/// 3. %D 为最近至多 3 个 %K 的平均值。
pub fn stochastic(highs: &[f64], lows: &[f64], closes: &[f64]) -> Option<(f64, f64)> {
    let len = closes.len();
    if len < STOCH_PERIOD || highs.len() != len || lows.len() != len {
        return None;
    }
    let available = len - STOCH_PERIOD + 1;
    let ks: Vec<f64> = (0..available.min(STOCH_D_PERIOD))
        .map(|back| percent_k(highs, lows, closes, len - back))
        .collect();
    Some((ks[0], mean(&ks)))
}

fn log_returns(closes: &[f64]) -> Vec<f64> {
    closes
        .windows(2)
        .filter(|w| w[0] > 0.0 && w[1] > 0.0)
        .map(|w| (w[1] / w[0]).ln())
        .filter(|r| r.is_finite())
        .collect()
}

fn annualized(returns: &[f64]) -> f64 {
    let std_dev = if returns.len() < 2 {
        0.0
    } else {
        let m = mean(returns);
        let var =
            returns.iter().map(|r| (r - m).powi(2)).sum::<f64>() / len_f64(returns.len() - 1);
        var.sqrt()
    };
    (std_dev * MINUTES_PER_YEAR.sqrt()).clamp(VOLATILITY_FLOOR, VOLATILITY_CAP)
}

/// # Summary
/// 全窗口已实现波动率：对数收益率标准差按年化分钟数放大，并裁剪到合理区间。
///
/// # Logic
/// 1. 没有任何可用收益率样本时返回 None，由调用方使用标的兜底常量。
/// 2. 否则计算样本标准差 × sqrt(525600)，裁剪到 [0.001, 0.5]。
pub fn realized_volatility(closes: &[f64]) -> Option<f64> {
    let returns = log_returns(closes);
    if returns.is_empty() {
        return None;
    }
    Some(annualized(&returns))
}

/// 最近 `window` 个收益率上的波动率；少于 2 个收益率时为 None，不使用兜底常量。
pub fn windowed_volatility(closes: &[f64], window: usize) -> Option<f64> {
    let start = closes.len().saturating_sub(window + 1);
    let returns = log_returns(&closes[start..]);
    if returns.len() < 2 {
        return None;
    }
    Some(annualized(&returns))
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = p * len_f64(sorted.len() - 1);
    let lo = rank.floor();
    let hi = rank.ceil();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let (lo_i, hi_i) = (lo as usize, hi as usize);
    sorted[lo_i] + (sorted[hi_i] - sorted[lo_i]) * (rank - lo)
}

/// # Summary
/// 支撑/阻力位：最近至多 100 个收盘价的第 20/80 百分位。
///
/// # Logic
/// 1. 少于 20 个点时使用均值 ± 2%。
/// 2. 否则排序后线性插值求百分位。
pub fn support_resistance(closes: &[f64]) -> Option<(f64, f64)> {
    if closes.is_empty() {
        return None;
    }
    let window = &closes[closes.len().saturating_sub(SR_LOOKBACK)..];
    if window.len() < BOLLINGER_PERIOD {
        let m = mean(window);
        return Some((m * (1.0 - SHORT_HISTORY_BAND), m * (1.0 + SHORT_HISTORY_BAND)));
    }
    let mut sorted = window.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    Some((percentile(&sorted, 0.2), percentile(&sorted, 0.8)))
}

/// # Summary
/// 市场结构分类：依据最近 10 个点的净涨跌幅。
///
/// # Logic
/// 1. |涨跌幅| < 2% 为震荡；> +5% 为突破；< -5% 为反转；其余为趋势。
/// 2. 少于 2 个点或首价非正时视为震荡。
pub fn market_structure(closes: &[f64]) -> MarketStructure {
    if closes.len() < 2 {
        return MarketStructure::Range;
    }
    let window = &closes[closes.len().saturating_sub(STRUCTURE_LOOKBACK)..];
    let first = window[0];
    let last = window[window.len() - 1];
    if first <= 0.0 {
        return MarketStructure::Range;
    }
    let change_pct = (last - first) / first * 100.0;
    if change_pct.abs() < 2.0 {
        MarketStructure::Range
    } else if change_pct > 5.0 {
        MarketStructure::Breakout
    } else if change_pct < -5.0 {
        MarketStructure::Reversal
    } else {
        MarketStructure::Trend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use kline_core::test_utils::minute_series;

    fn spec() -> SymbolSpec {
        SymbolSpec::new("BTCUSDT", 2, 0.3)
    }

    fn drift(i: usize) -> f64 {
        let base = 100.0 + 0.3 * len_f64(i);
        if i % 3 == 2 { base - 0.4 } else { base }
    }

    #[test]
    fn test_rsi_requires_fifteen_points() {
        let closes: Vec<f64> = (0..14).map(drift).collect();
        assert_eq!(rsi(&closes), None);
        let closes: Vec<f64> = (0..15).map(drift).collect();
        let value = rsi(&closes).unwrap();
        assert!(value > 50.0 && value < 100.0, "rsi = {value}");
    }

    #[test]
    fn test_rsi_extremes() {
        let rising: Vec<f64> = (0..20).map(|i| 100.0 + len_f64(i)).collect();
        assert_eq!(rsi(&rising), Some(100.0));
        let falling: Vec<f64> = (0..20).map(|i| 100.0 - len_f64(i)).collect();
        assert_eq!(rsi(&falling), Some(0.0));
    }

    #[test]
    fn test_macd_single_point_is_zero() {
        assert_eq!(macd(&[100.0]), Some((0.0, 0.0, 0.0)));
        assert_eq!(macd(&[]), None);
    }

    #[test]
    fn test_macd_positive_in_uptrend() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + len_f64(i)).collect();
        let (m, s, h) = macd(&closes).unwrap();
        assert!(m > 0.0);
        assert!((h - (m - s)).abs() < 1e-12);
    }

    #[test]
    fn test_bollinger_short_history_band() {
        let (u, m, l) = bollinger(&[100.0, 102.0]).unwrap();
        assert!((m - 101.0).abs() < 1e-9);
        assert!((u - 103.02).abs() < 1e-9);
        assert!((l - 98.98).abs() < 1e-9);
    }

    #[test]
    fn test_bollinger_flat_full_window_collapses() {
        let closes = vec![50.0; 25];
        assert_eq!(bollinger(&closes), Some((50.0, 50.0, 50.0)));
        // 不足 20 个点的平盘仍使用 ±2% 带宽
        let (u, m, l) = bollinger(&closes[..19]).unwrap();
        assert!(u > m && m > l);
    }

    #[test]
    fn test_bollinger_full_window() {
        let closes: Vec<f64> = (0..30).map(drift).collect();
        let (u, m, l) = bollinger(&closes).unwrap();
        let expected_mid = mean(&closes[10..]);
        assert!((m - expected_mid).abs() < 1e-9);
        assert!(u > m && m > l);
        assert!(((u - m) - (m - l)).abs() < 1e-9);
    }

    #[test]
    fn test_stochastic_bounds_and_flat_range() {
        let flat = vec![10.0; 14];
        assert_eq!(stochastic(&flat, &flat, &flat), Some((50.0, 50.0)));

        let closes: Vec<f64> = (0..13).map(drift).collect();
        assert_eq!(stochastic(&closes, &closes, &closes), None);

        let closes: Vec<f64> = (0..20).map(drift).collect();
        let highs: Vec<f64> = closes.iter().map(|c| c + 0.2).collect();
        let lows: Vec<f64> = closes.iter().map(|c| c - 0.2).collect();
        let (k, d) = stochastic(&highs, &lows, &closes).unwrap();
        assert!((0.0..=100.0).contains(&k));
        assert!((0.0..=100.0).contains(&d));
    }

    #[test]
    fn test_volatility_fallback_only_without_samples() {
        assert_eq!(realized_volatility(&[100.0]), None);
        let single = realized_volatility(&[100.0, 101.0]).unwrap();
        assert!((single - VOLATILITY_FLOOR).abs() < 1e-12);
        let closes: Vec<f64> = (0..30).map(drift).collect();
        let v = realized_volatility(&closes).unwrap();
        assert!((VOLATILITY_FLOOR..=VOLATILITY_CAP).contains(&v));
    }

    #[test]
    fn test_windowed_volatility_needs_two_returns() {
        assert_eq!(windowed_volatility(&[100.0, 101.0], 5), None);
        assert!(windowed_volatility(&[100.0, 101.0, 100.5], 5).is_some());
    }

    #[test]
    fn test_support_resistance_percentiles() {
        let closes: Vec<f64> = (1..=21).map(len_f64).collect();
        let (s, r) = support_resistance(&closes).unwrap();
        assert!((s - 5.0).abs() < 1e-9);
        assert!((r - 17.0).abs() < 1e-9);
    }

    #[test]
    fn test_market_structure_labels() {
        assert_eq!(market_structure(&[100.0, 101.0]), MarketStructure::Range);
        assert_eq!(market_structure(&[100.0, 103.0]), MarketStructure::Trend);
        assert_eq!(market_structure(&[100.0, 106.0]), MarketStructure::Breakout);
        assert_eq!(market_structure(&[100.0, 94.0]), MarketStructure::Reversal);
        assert_eq!(market_structure(&[100.0]), MarketStructure::Range);
    }

    #[test]
    fn test_compute_is_deterministic() {
        let start = Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap();
        let candles = minute_series(start, 30, drift);
        let (history, last) = candles.split_at(29);
        let a = compute(history, &last[0], &spec());
        let b = compute(history, &last[0], &spec());
        assert_eq!(a, b);
        assert!(a.rsi.is_some());
        assert!(a.stochastic_k.is_some());
        assert!(a.volatility_60m.is_some());
    }

    #[test]
    fn test_compute_first_candle_uses_fallback_volatility() {
        let start = Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap();
        let candle = minute_series(start + Duration::minutes(1), 1, |_| 100.0).remove(0);
        let set = compute(&[], &candle, &spec());
        assert_eq!(set.realized_volatility, Some(0.3));
        assert_eq!(set.rsi, None);
        assert_eq!(set.stochastic_k, None);
        assert_eq!(set.volatility_5m, None);
        assert_eq!(set.market_structure, Some(MarketStructure::Range));
    }
}
