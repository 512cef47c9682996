//! 重试策略模块
//!
//! 客户端按固定间隔重发请求，直到得到结果或超过放弃时间。

use crate::config::{ClientConfig, DEFAULT_GIVEUP_DURATION, DEFAULT_RETRY_DURATION};
use std::time::Duration;

/// 重试与放弃时间
///
/// - `retry` 为 0：只发起一次尝试
/// - `giveup` 为 0：不设总时限，且任一传输错误立即返回
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retry: Duration,
    pub giveup: Duration,
}

impl RetryPolicy {
    pub fn new(retry: Duration, giveup: Duration) -> Self {
        Self { retry, giveup }
    }

    /// 同一放弃时间下只尝试一次
    pub fn once(self) -> Self {
        Self {
            retry: Duration::ZERO,
            giveup: self.giveup,
        }
    }

    pub fn retries(&self) -> bool {
        !self.retry.is_zero()
    }

    pub fn has_giveup(&self) -> bool {
        !self.giveup.is_zero()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_DURATION, DEFAULT_GIVEUP_DURATION)
    }
}

impl From<&ClientConfig> for RetryPolicy {
    fn from(config: &ClientConfig) -> Self {
        Self::new(config.retry_duration(), config.giveup_duration())
    }
}
