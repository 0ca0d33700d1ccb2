use crate::store::error::StoreError;
use thiserror::Error;

/// # Summary
/// 滚动图表存储错误枚举。
///
/// # Invariants
/// - `Busy` 是正常的并发竞争信号，调用方可轮询重试，不应向上层暴露为故障。
/// - 存储层错误通过 `#[from]` 透传。
#[derive(Error, Debug)]
pub enum ChartError {
    // 该标的已有进行中的构建，稍后重试
    #[error("Build already in progress for {0}, retry later")]
    Busy(String),
    // 标的不在审批通过的集合中
    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),
    // 底层存储故障
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ChartError {
    /// 是否为可重试的竞争错误
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChartError::Busy(_))
    }
}
