use chrono::{DateTime, Duration, Utc};
use kline_core::common::{one_minute, truncate_to_minute};

/// # Summary
/// 缺口的来源类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapKind {
    // 空存储，回填最近一个批次
    Bootstrap,
    // 相邻时间戳之间的空洞
    Hole,
    // 最早记录之前的区间
    Preceding,
}

/// # Summary
/// 待回填的时间区间 `[start, end)`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gap {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub kind: GapKind,
}

/// # Summary
/// 缺口探测器：纯函数，根据已存储的时间戳给出下一个缺失区间。
///
/// # Invariants
/// - 返回区间宽度不超过 `batch_width`。
/// - `Preceding` 区间不会越过 `now - max_lookback`。
#[derive(Debug, Clone, Copy)]
pub struct GapDetector {
    pub batch_width: Duration,
    pub max_lookback: Duration,
}

impl GapDetector {
    pub fn new(batch_width: Duration, max_lookback: Duration) -> Self {
        Self {
            batch_width,
            max_lookback,
        }
    }

    /// # Summary
    /// 查找下一个需要回填的区间。
    ///
    /// # Logic
    /// 1. 无记录：返回 `[now - batch, now)`。
    /// 2. 扫描相邻时间戳，首个间隔 > 2 分钟的空洞即为结果（裁剪到批次宽度）。
    /// 3. 无空洞（含点数稀少的情况）：返回最早点之前的一个批次。
    /// 5. 最早点之前的区间若越过最大回溯期限，则返回 None。
    ///
    /// # Arguments
    /// * `timestamps`: 升序排列的已存储时间戳。
    /// * `now`: 当前时间。
    ///
    /// # Returns
    /// 需要回填的区间，或 None 表示无事可做。
    pub fn next_gap(&self, timestamps: &[DateTime<Utc>], now: DateTime<Utc>) -> Option<Gap> {
        let now = truncate_to_minute(now);
        let Some(&earliest) = timestamps.first() else {
            return Some(Gap {
                start: now - self.batch_width,
                end: now,
                kind: GapKind::Bootstrap,
            });
        };

        if let Some(hole) = self.first_hole(timestamps) {
            return Some(hole);
        }

        let start = earliest - self.batch_width;
        if start < now - self.max_lookback {
            return None;
        }
        Some(Gap {
            start,
            end: earliest,
            kind: GapKind::Preceding,
        })
    }

    fn first_hole(&self, timestamps: &[DateTime<Utc>]) -> Option<Gap> {
        timestamps.windows(2).find_map(|pair| {
            let (prev, next) = (pair[0], pair[1]);
            if next - prev <= Duration::minutes(2) {
                return None;
            }
            let start = prev + one_minute();
            Some(Gap {
                start,
                end: next.min(start + self.batch_width),
                kind: GapKind::Hole,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn detector() -> GapDetector {
        GapDetector::new(Duration::minutes(15), Duration::days(7))
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 30).unwrap()
    }

    fn minutes(base: DateTime<Utc>, offsets: &[i64]) -> Vec<DateTime<Utc>> {
        offsets.iter().map(|m| base + Duration::minutes(*m)).collect()
    }

    #[test]
    fn test_empty_proposes_latest_batch() {
        let gap = detector().next_gap(&[], now()).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap();
        assert_eq!(gap.end, end);
        assert_eq!(gap.start, end - Duration::minutes(15));
        assert_eq!(gap.kind, GapKind::Bootstrap);
    }

    #[test]
    fn test_sparse_history_reports_hole_first() {
        let t = Utc.with_ymd_and_hms(2026, 4, 1, 11, 0, 0).unwrap();
        let stamps = minutes(t, &[0, 1, 4, 5]);
        let gap = detector().next_gap(&stamps, now()).unwrap();
        assert_eq!(gap.kind, GapKind::Hole);
        assert_eq!(gap.start, t + Duration::minutes(2));
        assert_eq!(gap.end, t + Duration::minutes(4));
    }

    #[test]
    fn test_sparse_contiguous_history_backfills_before_earliest() {
        let t = Utc.with_ymd_and_hms(2026, 4, 1, 11, 0, 0).unwrap();
        let stamps = minutes(t, &[0, 1, 2]);
        let gap = detector().next_gap(&stamps, now()).unwrap();
        assert_eq!(gap.kind, GapKind::Preceding);
        assert_eq!(gap.end, t);
        assert_eq!(gap.start, t - Duration::minutes(15));
    }

    #[test]
    fn test_reports_hole_between_adjacent_points() {
        let t = Utc.with_ymd_and_hms(2026, 4, 1, 11, 0, 0).unwrap();
        let stamps = minutes(t, &[0, 1, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
        let gap = detector().next_gap(&stamps, now()).unwrap();
        assert_eq!(gap.kind, GapKind::Hole);
        assert_eq!(gap.start, t + Duration::minutes(2));
        assert_eq!(gap.end, t + Duration::minutes(4));
    }

    #[test]
    fn test_two_minute_delta_is_not_a_hole() {
        let t = Utc.with_ymd_and_hms(2026, 4, 1, 11, 0, 0).unwrap();
        let stamps = minutes(t, &[0, 2, 4, 6, 8, 10, 12, 14, 16, 18]);
        let gap = detector().next_gap(&stamps, now()).unwrap();
        assert_eq!(gap.kind, GapKind::Preceding);
    }

    #[test]
    fn test_wide_hole_is_clipped_to_batch() {
        let t = Utc.with_ymd_and_hms(2026, 4, 1, 8, 0, 0).unwrap();
        let mut offsets: Vec<i64> = (0..10).collect();
        offsets.push(200);
        let stamps = minutes(t, &offsets);
        let gap = detector().next_gap(&stamps, now()).unwrap();
        assert_eq!(gap.start, t + Duration::minutes(10));
        assert_eq!(gap.end, t + Duration::minutes(25));
    }

    #[test]
    fn test_refuses_beyond_max_lookback() {
        let t = now() - Duration::days(7) + Duration::minutes(5);
        let stamps = minutes(truncate_to_minute(t), &[0, 1, 2]);
        assert_eq!(detector().next_gap(&stamps, now()), None);
    }
}
