use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use kline_core::chart::entity::{ChartRecord, IndicatorSet};
use kline_core::store::error::StoreError;
use kline_core::store::port::ChartRepository;
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::debug;

const COLUMNS: &str = "ts, open, high, low, close, volume, trade_count, rsi, macd, macd_signal, \
     macd_histogram, bollinger_upper, bollinger_middle, bollinger_lower, stochastic_k, \
     stochastic_d, realized_volatility, volatility_5m, volatility_15m, volatility_60m, \
     support_level, resistance_level, market_structure, is_complete";

/// ChartRepository 的 SQLite 实现，采用“一库一标的”策略。
///
/// # Summary
/// 为每个标的维护一个独立的 SQLite 数据库文件，以实现物理数据隔离。
///
/// # Invariants
/// * 数据库文件存储在 `base_path` 目录下。
/// * 时间戳以 Unix 秒存储并作为主键，保证 (symbol, timestamp) 唯一。
/// * 价格以 TEXT 存储，避免 Decimal 精度丢失。
pub struct SqliteChartStore {
    base_path: PathBuf,
    pools: DashMap<String, SqlitePool>,
}

impl SqliteChartStore {
    /// 使用全局配置的数据根目录创建实例。
    ///
    /// # Logic
    /// 1. 获取配置的数据根目录下的 `chart` 子目录。
    /// 2. 确保该目录存在。
    ///
    /// # Returns
    /// * `Result<Self, StoreError>` - 存储实例或错误。
    pub fn new() -> Result<Self, StoreError> {
        Self::open(crate::config::get_root_dir().join("chart"))
    }

    /// 在指定目录下创建实例。
    pub fn open(base_path: PathBuf) -> Result<Self, StoreError> {
        if !base_path.exists() {
            std::fs::create_dir_all(&base_path).map_err(|e| StoreError::InitError(e.to_string()))?;
        }
        Ok(Self {
            base_path,
            pools: DashMap::new(),
        })
    }

    /// 获取或初始化特定标的的连接池。
    ///
    /// # Logic
    /// 1. 根据标的代码生成文件名。
    /// 2. 配置 SQLite 连接选项，开启 `create_if_missing`。
    /// 3. 如果缓存中没有，则创建新连接池并运行初始化建表 SQL。
    async fn get_or_init_pool(&self, symbol: &str) -> Result<SqlitePool, StoreError> {
        if let Some(pool) = self.pools.get(symbol) {
            return Ok(pool.clone());
        }

        let db_path = self.base_path.join(format!("{}.db", symbol));
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(|e| StoreError::InitError(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chart_records (
                ts INTEGER PRIMARY KEY,
                open TEXT NOT NULL,
                high TEXT NOT NULL,
                low TEXT NOT NULL,
                close TEXT NOT NULL,
                volume TEXT NOT NULL,
                trade_count INTEGER,
                rsi REAL,
                macd REAL,
                macd_signal REAL,
                macd_histogram REAL,
                bollinger_upper REAL,
                bollinger_middle REAL,
                bollinger_lower REAL,
                stochastic_k REAL,
                stochastic_d REAL,
                realized_volatility REAL,
                volatility_5m REAL,
                volatility_15m REAL,
                volatility_60m REAL,
                support_level REAL,
                resistance_level REAL,
                market_structure TEXT,
                is_complete INTEGER NOT NULL
            );
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| StoreError::InitError(e.to_string()))?;

        debug!("Opened chart database for {}", symbol);
        // 并发初始化时以先写入者为准
        let pool = self
            .pools
            .entry(symbol.to_string())
            .or_insert(pool)
            .clone();
        Ok(pool)
    }
}

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn to_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn decimal_col(row: &SqliteRow, col: &str) -> Result<Decimal, StoreError> {
    let raw: String = row.try_get(col).map_err(db_err)?;
    Decimal::from_str(&raw).map_err(|e| StoreError::Corrupted(format!("{col}: {e}")))
}

/// 将一行数据还原为 ChartRecord。
fn row_to_record(symbol: &str, row: &SqliteRow) -> Result<ChartRecord, StoreError> {
    let ts: i64 = row.try_get("ts").map_err(db_err)?;
    let timestamp = DateTime::<Utc>::from_timestamp(ts, 0)
        .ok_or_else(|| StoreError::Corrupted(format!("timestamp {ts}")))?;
    let trade_count: Option<i64> = row.try_get("trade_count").map_err(db_err)?;
    let structure: Option<String> = row.try_get("market_structure").map_err(db_err)?;
    let f = |col: &str| -> Result<Option<f64>, StoreError> { row.try_get(col).map_err(db_err) };

    Ok(ChartRecord {
        symbol: symbol.to_string(),
        timestamp,
        open: decimal_col(row, "open")?,
        high: decimal_col(row, "high")?,
        low: decimal_col(row, "low")?,
        close: decimal_col(row, "close")?,
        volume: decimal_col(row, "volume")?,
        trade_count: trade_count.and_then(|n| u64::try_from(n).ok()),
        indicators: IndicatorSet {
            rsi: f("rsi")?,
            macd: f("macd")?,
            macd_signal: f("macd_signal")?,
            macd_histogram: f("macd_histogram")?,
            bollinger_upper: f("bollinger_upper")?,
            bollinger_middle: f("bollinger_middle")?,
            bollinger_lower: f("bollinger_lower")?,
            stochastic_k: f("stochastic_k")?,
            stochastic_d: f("stochastic_d")?,
            realized_volatility: f("realized_volatility")?,
            volatility_5m: f("volatility_5m")?,
            volatility_15m: f("volatility_15m")?,
            volatility_60m: f("volatility_60m")?,
            support_level: f("support_level")?,
            resistance_level: f("resistance_level")?,
            market_structure: structure
                .map(|s| s.parse().map_err(StoreError::Corrupted))
                .transpose()?,
        },
        is_complete: row.try_get("is_complete").map_err(db_err)?,
    })
}

#[async_trait]
impl ChartRepository for SqliteChartStore {
    async fn get(
        &self,
        symbol: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<ChartRecord>, StoreError> {
        let pool = self.get_or_init_pool(symbol).await?;
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM chart_records WHERE ts = ?"
        ))
        .bind(timestamp.timestamp())
        .fetch_optional(&pool)
        .await
        .map_err(db_err)?;
        row.map(|r| row_to_record(symbol, &r)).transpose()
    }

    /// # Summary
    /// 写入或覆盖一条记录。
    ///
    /// # Logic
    /// 1. 获取标的连接池。
    /// 2. 执行 `INSERT OR REPLACE`，以时间戳主键保证唯一。
    async fn put(&self, record: &ChartRecord) -> Result<(), StoreError> {
        let pool = self.get_or_init_pool(&record.symbol).await?;
        let ind = &record.indicators;
        sqlx::query(&format!(
            "INSERT OR REPLACE INTO chart_records ({COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(record.timestamp.timestamp())
        .bind(record.open.to_string())
        .bind(record.high.to_string())
        .bind(record.low.to_string())
        .bind(record.close.to_string())
        .bind(record.volume.to_string())
        .bind(record.trade_count.and_then(|n| i64::try_from(n).ok()))
        .bind(ind.rsi)
        .bind(ind.macd)
        .bind(ind.macd_signal)
        .bind(ind.macd_histogram)
        .bind(ind.bollinger_upper)
        .bind(ind.bollinger_middle)
        .bind(ind.bollinger_lower)
        .bind(ind.stochastic_k)
        .bind(ind.stochastic_d)
        .bind(ind.realized_volatility)
        .bind(ind.volatility_5m)
        .bind(ind.volatility_15m)
        .bind(ind.volatility_60m)
        .bind(ind.support_level)
        .bind(ind.resistance_level)
        .bind(ind.market_structure.map(|s| s.as_str()))
        .bind(record.is_complete)
        .execute(&pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn load_before(
        &self,
        symbol: &str,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ChartRecord>, StoreError> {
        let pool = self.get_or_init_pool(symbol).await?;
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM chart_records WHERE ts < ? ORDER BY ts DESC LIMIT ?"
        ))
        .bind(before.timestamp())
        .bind(to_limit(limit))
        .fetch_all(&pool)
        .await
        .map_err(db_err)?;
        rows.iter()
            .rev()
            .map(|r| row_to_record(symbol, r))
            .collect()
    }

    async fn load_latest(
        &self,
        symbol: &str,
        limit: usize,
        complete_only: bool,
    ) -> Result<Vec<ChartRecord>, StoreError> {
        let pool = self.get_or_init_pool(symbol).await?;
        let filter = if complete_only {
            "WHERE is_complete = 1"
        } else {
            ""
        };
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM chart_records {filter} ORDER BY ts DESC LIMIT ?"
        ))
        .bind(to_limit(limit))
        .fetch_all(&pool)
        .await
        .map_err(db_err)?;
        rows.iter()
            .rev()
            .map(|r| row_to_record(symbol, r))
            .collect()
    }

    async fn timestamps(&self, symbol: &str) -> Result<Vec<DateTime<Utc>>, StoreError> {
        let pool = self.get_or_init_pool(symbol).await?;
        let rows: Vec<(i64,)> = sqlx::query_as("SELECT ts FROM chart_records ORDER BY ts ASC")
            .fetch_all(&pool)
            .await
            .map_err(db_err)?;
        rows.into_iter()
            .map(|(ts,)| {
                DateTime::<Utc>::from_timestamp(ts, 0)
                    .ok_or_else(|| StoreError::Corrupted(format!("timestamp {ts}")))
            })
            .collect()
    }

    async fn count(&self, symbol: &str) -> Result<usize, StoreError> {
        let pool = self.get_or_init_pool(symbol).await?;
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chart_records")
            .fetch_one(&pool)
            .await
            .map_err(db_err)?;
        Ok(usize::try_from(n).unwrap_or(0))
    }

    /// # Summary
    /// 删除 `[start, end)` 区间内的记录。
    ///
    /// # Returns
    /// 实际删除的行数。
    async fn delete_range(
        &self,
        symbol: &str,
        start: Option<DateTime<Utc>>,
        end: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let pool = self.get_or_init_pool(symbol).await?;
        let result = sqlx::query("DELETE FROM chart_records WHERE ts >= ? AND ts < ?")
            .bind(start.map_or(i64::MIN, |s| s.timestamp()))
            .bind(end.timestamp())
            .execute(&pool)
            .await
            .map_err(db_err)?;
        Ok(usize::try_from(result.rows_affected()).unwrap_or(usize::MAX))
    }
}
