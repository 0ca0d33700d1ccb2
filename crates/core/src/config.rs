use crate::common::SymbolSpec;
use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 全局应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub market: MarketConfig,
    pub backfill: BackfillConfig,
    pub provider: ProviderConfig,
    pub database: DatabaseConfig,
    pub log: LogConfig,
}

/// # Summary
/// 滚动存储相关配置。
///
/// # Invariants
/// - `window_size` 必须大于 0。
/// - `symbols` 即审批通过的标的集合，未列出的标的会被拒绝。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub symbols: Vec<SymbolSpec>,
    // 每个标的保留的最大记录数
    pub window_size: usize,
    // 长期保留期（天），超过即清理，与容量无关
    pub retention_days: i64,
    // 实时轮询周期（秒）
    pub live_poll_secs: u64,
    // 维护任务周期（秒）
    pub maintenance_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackfillConfig {
    // 单次回填的最大分钟宽度
    pub batch_minutes: i64,
    // 调度周期（毫秒）
    pub tick_interval_ms: u64,
    // 每分钟允许的上游请求数
    pub requests_per_minute: u32,
    // 最大回溯天数
    pub max_lookback_days: i64,
    // 单次抓取超时（秒）
    pub fetch_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub data_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub dir: String,
    pub filter: String,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            symbols: vec![
                SymbolSpec::new("BTCUSDT", 2, 0.30),
                SymbolSpec::new("ETHUSDT", 2, 0.40),
                SymbolSpec::new("SOLUSDT", 3, 0.45),
                SymbolSpec::new("XRPUSDT", 4, 0.45),
                SymbolSpec::new("DOGEUSDT", 5, 0.50),
            ],
            window_size: 600,
            retention_days: 30,
            live_poll_secs: 60,
            maintenance_interval_secs: 300,
        }
    }
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            batch_minutes: 15,
            tick_interval_ms: 3_000,
            requests_per_minute: 180,
            max_lookback_days: 7,
            fetch_timeout_secs: 10,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.binance.com".to_string(),
            request_timeout_secs: 10,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: "logs".to_string(),
            filter: "info".to_string(),
        }
    }
}

impl MarketConfig {
    pub fn retention(&self) -> ChronoDuration {
        ChronoDuration::days(self.retention_days)
    }

    /// 按名称查找标的配置
    pub fn symbol(&self, name: &str) -> Option<&SymbolSpec> {
        self.symbols.iter().find(|s| s.name == name)
    }
}

impl BackfillConfig {
    pub fn batch_width(&self) -> ChronoDuration {
        ChronoDuration::minutes(self.batch_minutes)
    }

    pub fn max_lookback(&self) -> ChronoDuration {
        ChronoDuration::days(self.max_lookback_days)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.market.window_size, 600);
        assert_eq!(config.market.retention_days, 30);
        assert_eq!(config.backfill.batch_minutes, 15);
        assert_eq!(config.backfill.tick_interval_ms, 3_000);
        assert_eq!(config.backfill.requests_per_minute, 180);
        assert_eq!(config.backfill.max_lookback_days, 7);
        assert_eq!(config.database.data_dir, "data");
        assert!(config.market.symbol("BTCUSDT").is_some());
        assert!(config.market.symbol("NOPE").is_none());
    }

    #[test]
    fn test_partial_config_falls_back_to_defaults() {
        let json = r#"{ "backfill": { "batch_minutes": 30 } }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.backfill.batch_minutes, 30);
        assert_eq!(config.backfill.requests_per_minute, 180);
        assert_eq!(config.market.window_size, 600);
    }
}
