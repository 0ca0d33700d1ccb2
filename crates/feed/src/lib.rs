//! 上游一分钟 K 线数据源。
pub mod binance;

pub use binance::BinanceProvider;
