use config::{Config, ConfigError, Environment, File};
use kline_core::config::AppConfig;
use std::path::Path;

/// 默认配置文件路径（不存在时忽略）
pub const CONFIG_PATH: &str = "config/kline.toml";

/// # Summary
/// 加载应用配置。
///
/// # Logic
/// 1. 以 `AppConfig` 的默认值为底。
/// 2. 叠加可选的 TOML 文件。
/// 3. 叠加 `KLINE__SECTION__KEY` 形式的环境变量。
/// 4. 校验标的集合与窗口容量。
///
/// # Arguments
/// * `path`: 配置文件路径。
///
/// # Returns
/// 合并后的配置，或 `ConfigError`。
pub fn load(path: &Path) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = Config::builder()
        .add_source(File::from(path).required(false))
        .add_source(
            Environment::with_prefix("KLINE")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    if config.market.symbols.is_empty() {
        return Err(ConfigError::Message("market.symbols must not be empty".into()));
    }
    if config.market.window_size == 0 {
        return Err(ConfigError::Message("market.window_size must be positive".into()));
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = load(Path::new("does/not/exist.toml")).unwrap();
        assert_eq!(config.market.window_size, 600);
        assert_eq!(config.market.symbols.len(), 5);
        assert_eq!(config.backfill.requests_per_minute, 180);
    }

    #[test]
    fn test_file_overrides_selected_keys() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[market]
window_size = 120

[[market.symbols]]
name = "BTCUSDT"
price_scale = 2
fallback_volatility = 0.3

[backfill]
batch_minutes = 30
"#
        )
        .unwrap();

        let config = load(file.path()).unwrap();
        assert_eq!(config.market.window_size, 120);
        assert_eq!(config.market.symbols.len(), 1);
        assert_eq!(config.backfill.batch_minutes, 30);
        assert_eq!(config.backfill.tick_interval_ms, 3_000);
        assert_eq!(config.database.data_dir, "data");
    }

    #[test]
    fn test_rejects_empty_symbol_set() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[market]\nsymbols = []").unwrap();
        assert!(load(file.path()).is_err());
    }
}
