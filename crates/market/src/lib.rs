//! 顺序滚动图表存储与缺口回填服务。

pub mod backfill;
pub mod gap;
pub mod indicator;
pub mod limiter;
pub mod live;
pub mod maintenance;
pub mod rolling;
pub mod validator;
