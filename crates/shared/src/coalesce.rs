//! 并发请求合并
//!
//! 同一 key 的重复并发操作只执行一次：首个调用方（leader）真正执行，
//! 其余调用方等待其结果并共享同一份返回值。用于避免重复的并发导入
//! 对存储层产生竞争写入。

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::future::Future;
use tokio::sync::watch;
use tracing::debug;

/// 请求合并器
///
/// 结果类型必须可克隆，以便在 leader 与所有等待者之间共享。
pub struct Coalescer<T: Clone + Send + Sync + 'static> {
    in_flight: DashMap<String, watch::Receiver<Option<T>>>,
}

/// leader 的占位守卫：leader 退出时（含被取消）移除占位，
/// 否则该 key 会永远留在表里，后续调用全部退化为各自执行。
struct InFlightGuard<'a, T: Clone + Send + Sync + 'static> {
    map: &'a DashMap<String, watch::Receiver<Option<T>>>,
    key: &'a str,
}

impl<T: Clone + Send + Sync + 'static> Drop for InFlightGuard<'_, T> {
    fn drop(&mut self) {
        self.map.remove(self.key);
    }
}

impl<T: Clone + Send + Sync + 'static> Coalescer<T> {
    pub fn new() -> Self {
        Self {
            in_flight: DashMap::new(),
        }
    }

    /// 当前进行中的操作数量
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// 执行或合并同 key 操作
    ///
    /// 若该 key 已有进行中的操作，等待其完成并返回同一结果；
    /// 否则成为 leader，执行 operation 并把结果广播给等待者。
    pub async fn run<F, Fut>(&self, key: &str, operation: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let mut leader_tx = None;

        // entry 锁在 match 结束前释放，不会跨 await 持有
        let follower_rx = match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(entry) => Some(entry.get().clone()),
            Entry::Vacant(entry) => {
                let (tx, rx) = watch::channel(None);
                entry.insert(rx);
                leader_tx = Some(tx);
                None
            }
        };

        if let Some(mut rx) = follower_rx {
            debug!(key, "合并到进行中的同 key 操作");
            if let Ok(guard) = rx.wait_for(|v| v.is_some()).await
                && let Some(result) = guard.clone()
            {
                return result;
            }
            // leader 异常退出未广播结果，退化为自行执行一次
            debug!(key, "leader 未广播结果，改为自行执行");
            return operation().await;
        }

        let _guard = InFlightGuard {
            map: &self.in_flight,
            key,
        };
        let result = operation().await;

        if let Some(tx) = leader_tx {
            let _ = tx.send(Some(result.clone()));
        }

        result
    }
}

impl<T: Clone + Send + Sync + 'static> Default for Coalescer<T> {
    fn default() -> Self {
        Self::new()
    }
}
