use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use kline_core::config::ProviderConfig;
use kline_core::market::entity::Candle;
use kline_core::market::error::MarketError;
use kline_core::market::port::MarketDataProvider;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use std::str::FromStr;
use tracing::{debug, warn};

// 单次请求允许返回的最大 K 线数
const MAX_LIMIT: i64 = 1000;

/// # Summary
/// 交易所公开 K 线接口的行情提供者。
///
/// # Invariants
/// - 使用 `reqwest` 异步客户端进行通讯，客户端自带请求超时。
/// - 只请求 `1m` 周期，返回结果已按 `[start, end)` 过滤。
#[derive(Clone)]
pub struct BinanceProvider {
    client: Client,
    base_url: String,
    timeout_secs: u64,
}

impl BinanceProvider {
    /// # Summary
    /// 根据配置创建提供者。
    ///
    /// # Logic
    /// 1. 以 `request_timeout_secs` 配置客户端超时。
    /// 2. 去掉 `base_url` 末尾的斜杠。
    ///
    /// # Returns
    /// 初始化后的提供者，客户端构建失败时返回 `MarketError::Unknown`。
    pub fn new(config: &ProviderConfig) -> Result<Self, MarketError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("kline-feed/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MarketError::Unknown(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout_secs: config.request_timeout_secs,
        })
    }
}

/// K 线接口查询参数，`endTime` 为闭区间（毫秒）。
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct KlineQuery<'a> {
    symbol: &'a str,
    interval: &'static str,
    start_time: i64,
    end_time: i64,
    limit: i64,
}

impl<'a> KlineQuery<'a> {
    /// 将右开区间 `[start, end)` 转换为接口的闭区间参数。
    fn minute_range(symbol: &'a str, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            symbol,
            interval: "1m",
            start_time: start.timestamp_millis(),
            end_time: (end - Duration::milliseconds(1)).timestamp_millis(),
            limit: (end - start).num_minutes().clamp(1, MAX_LIMIT),
        }
    }
}

fn decimal_field(row: &[Value], index: usize) -> Result<Decimal, MarketError> {
    let parsed = match row.get(index) {
        Some(Value::String(s)) => Decimal::from_str(s).ok(),
        Some(Value::Number(n)) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        _ => None,
    };
    parsed.ok_or_else(|| MarketError::Parse(format!("field {index} is not a decimal")))
}

/// # Summary
/// 解析 K 线数组响应。
///
/// # Logic
/// 1. 每一行形如 `[openTime, open, high, low, close, volume, closeTime, quoteVolume, trades, ...]`。
/// 2. 价格与成交量既可能是字符串也可能是数字。
/// 3. 成交笔数缺失时为 None。
///
/// # Arguments
/// * `body`: 已解析为 JSON 的响应体。
///
/// # Returns
/// 按出现顺序排列的 K 线，任意一行格式错误即返回 `MarketError::Parse`。
pub fn parse_klines(body: &Value) -> Result<Vec<Candle>, MarketError> {
    let rows = body
        .as_array()
        .ok_or_else(|| MarketError::Parse("expected an array of klines".into()))?;

    rows.iter()
        .map(|row| {
            let row = row
                .as_array()
                .ok_or_else(|| MarketError::Parse("kline row is not an array".into()))?;
            let open_ms = row
                .first()
                .and_then(Value::as_i64)
                .ok_or_else(|| MarketError::Parse("missing open time".into()))?;
            let time = DateTime::<Utc>::from_timestamp_millis(open_ms)
                .ok_or_else(|| MarketError::Parse(format!("invalid open time {open_ms}")))?;
            Ok(Candle {
                time,
                open: decimal_field(row, 1)?,
                high: decimal_field(row, 2)?,
                low: decimal_field(row, 3)?,
                close: decimal_field(row, 4)?,
                volume: decimal_field(row, 5)?,
                trade_count: row.get(8).and_then(Value::as_u64),
            })
        })
        .collect()
}

#[async_trait]
impl MarketDataProvider for BinanceProvider {
    /// # Summary
    /// 抓取 `[start, end)` 内的一分钟 K 线。
    ///
    /// # Logic
    /// 1. `endTime` 取 `end - 1ms`，使区间右开。
    /// 2. HTTP 429/418 映射为 `RateLimited`，其余非 2xx 映射为 `Network`。
    /// 3. 解析响应并丢弃区间外的数据。
    async fn fetch_candles(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, MarketError> {
        if end <= start {
            return Ok(Vec::new());
        }
        let query = KlineQuery::minute_range(symbol, start, end);
        let url = format!("{}/api/v3/klines", self.base_url);
        debug!("GET {} {:?}", url, query);

        let resp = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    MarketError::Timeout(self.timeout_secs)
                } else {
                    MarketError::Network(e.to_string())
                }
            })?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
            warn!("Upstream rate limit hit for {} (HTTP {})", symbol, status);
            return Err(MarketError::RateLimited);
        }
        if !status.is_success() {
            return Err(MarketError::Network(format!("HTTP {}", status)));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| MarketError::Parse(e.to_string()))?;
        let candles = parse_klines(&body)?
            .into_iter()
            .filter(|c| c.time >= start && c.time < end)
            .collect();
        Ok(candles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_parse_string_and_numeric_fields() {
        let body = json!([
            [1704067200000_i64, "42000.10", "42010.00", "41990.50", "42005.00", "12.5",
             1704067259999_i64, "525000.0", 310, "6.1", "256000.0", "0"],
            [1704067260000_i64, 42005.0, 42020, 42000, 42015.5, 3]
        ]);
        let candles = parse_klines(&body).unwrap();
        assert_eq!(candles.len(), 2);

        let first = &candles[0];
        assert_eq!(first.time.timestamp(), 1_704_067_200);
        assert_eq!(first.open, dec!(42000.10));
        assert_eq!(first.low, dec!(41990.50));
        assert_eq!(first.volume, dec!(12.5));
        assert_eq!(first.trade_count, Some(310));

        let second = &candles[1];
        assert_eq!(second.high, dec!(42020));
        assert_eq!(second.close, dec!(42015.5));
        assert_eq!(second.trade_count, None);
    }

    #[test]
    fn test_parse_rejects_malformed_rows() {
        assert!(matches!(
            parse_klines(&json!({"code": -1121})),
            Err(MarketError::Parse(_))
        ));
        assert!(matches!(
            parse_klines(&json!([[1704067200000_i64, "abc", "1", "1", "1", "1"]])),
            Err(MarketError::Parse(_))
        ));
        assert!(matches!(
            parse_klines(&json!([[1704067200000_i64, "1", "1"]])),
            Err(MarketError::Parse(_))
        ));
        assert!(parse_klines(&json!([])).unwrap().is_empty());
    }

    #[test]
    fn test_query_uses_exclusive_end() {
        let start = DateTime::<Utc>::from_timestamp(1_704_067_200, 0).unwrap();
        let query = KlineQuery::minute_range("BTCUSDT", start, start + Duration::minutes(15));
        let encoded = serde_json::to_value(&query).unwrap();
        assert_eq!(encoded["startTime"], 1_704_067_200_000_i64);
        assert_eq!(encoded["endTime"], 1_704_068_099_999_i64);
        assert_eq!(encoded["limit"], 15);
        assert_eq!(encoded["interval"], "1m");
    }
}
