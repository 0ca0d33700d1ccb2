//! 图表记录的持久化实现。
pub mod chart;
pub mod config;
pub mod mem;

pub use chart::SqliteChartStore;
pub use config::set_root_dir;
pub use mem::MemChartStore;
