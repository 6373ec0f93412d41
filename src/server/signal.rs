use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 一次性信号
///
/// 最多触发一次，触发后所有已经在等待和之后才开始等待的任务都会立即返回。
/// 重复或并发触发是安全的，只有第一次调用 [`Signal::fire`] 返回 `true`。
#[derive(Debug, Clone, Default)]
pub struct Signal {
    token: CancellationToken,
    fired: Arc<AtomicBool>,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// 触发信号，返回本次调用是否为第一次触发
    pub fn fire(&self) -> bool {
        let first = !self.fired.swap(true, Ordering::AcqRel);
        self.token.cancel();
        first
    }

    /// 是否已经触发
    pub fn is_fired(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 等待信号触发
    pub async fn wait(&self) {
        self.token.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fire_once() {
        let signal = Signal::new();
        assert!(!signal.is_fired());

        assert!(signal.fire());
        assert!(!signal.fire());
        assert!(signal.is_fired());

        // 触发后才开始等待的任务也会立即返回
        tokio::time::timeout(Duration::from_secs(1), signal.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_waiters_released() {
        let signal = Signal::new();
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let signal = signal.clone();
                tokio::spawn(async move { signal.wait().await })
            })
            .collect();

        let firers: Vec<_> = (0..4)
            .map(|_| {
                let signal = signal.clone();
                tokio::spawn(async move { signal.fire() })
            })
            .collect();

        let mut first_count = 0;
        for firer in firers {
            if firer.await.unwrap() {
                first_count += 1;
            }
        }
        assert_eq!(first_count, 1);

        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .unwrap()
                .unwrap();
        }
    }
}
