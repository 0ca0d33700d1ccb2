use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// # Summary
/// 令牌桶限流器，控制每分钟对上游数据源的请求数。
///
/// # Invariants
/// - 令牌数不超过容量（即每分钟请求预算）。
/// - 补充与扣减在同一临界区内完成，多个调度协程并发检查时保持原子性。
pub struct TokenBucket {
    capacity: f64,
    // 每秒补充的令牌数
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
}

impl TokenBucket {
    /// # Summary
    /// 创建一个初始满额的令牌桶。
    ///
    /// # Arguments
    /// * `per_minute`: 每分钟允许的请求数。
    pub fn per_minute(per_minute: u32) -> Self {
        let capacity = f64::from(per_minute.max(1));
        Self {
            capacity,
            refill_per_sec: capacity / 60.0,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;
    }

    /// # Summary
    /// 尝试获取一个令牌。
    ///
    /// # Logic
    /// 1. 按流逝时间补充令牌。
    /// 2. 剩余令牌 >= 1 时扣减并返回 true，否则返回 false。
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock().unwrap_or_else(|e| e.into_inner());
        self.refill(&mut bucket);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// 距离下一个令牌可用还需等待的时长，已有令牌时为 None
    pub fn delay_until_available(&self) -> Option<Duration> {
        let mut bucket = self.bucket.lock().unwrap_or_else(|e| e.into_inner());
        self.refill(&mut bucket);
        if bucket.tokens >= 1.0 {
            return None;
        }
        Some(Duration::from_secs_f64(
            (1.0 - bucket.tokens) / self.refill_per_sec,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_bucket_exhausts_and_refills() {
        let limiter = TokenBucket::per_minute(3);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        let wait = limiter.delay_until_available().unwrap();
        assert!(wait <= Duration::from_secs(20));

        // 每 20 秒补充一个令牌
        tokio::time::advance(Duration::from_secs(21)).await;
        assert_eq!(limiter.delay_until_available(), None);
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        // 长时间空闲后最多补满容量
        tokio::time::advance(Duration::from_secs(600)).await;
        for _ in 0..3 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());
    }
}
