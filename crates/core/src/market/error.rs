use thiserror::Error;

/// # Summary
/// 行情数据源错误枚举，处理网络、超时、解析及限流等上游问题。
///
/// # Invariants
/// - 必须通过 `thiserror` 派生 `Error` trait。
/// - 所有变体都视为瞬时故障，调用方记录日志后在下一周期重试。
#[derive(Error, Debug)]
pub enum MarketError {
    // 网络层错误，包含底层 HTTP 客户端错误信息或非 2xx 状态
    #[error("Network error: {0}")]
    Network(String),
    // 请求超过允许的等待时长
    #[error("Request timed out after {0}s")]
    Timeout(u64),
    // 数据解析错误，如 JSON 格式不匹配
    #[error("Parse error: {0}")]
    Parse(String),
    // 上游返回限流信号 (HTTP 429/418)
    #[error("Rate limited by provider")]
    RateLimited,
    // 未知或未分类的错误
    #[error("Unknown error: {0}")]
    Unknown(String),
}
