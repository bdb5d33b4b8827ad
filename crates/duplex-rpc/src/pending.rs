//! 待响应调用表
//!
//! 每个会话一张表：request_id -> 回复槽。条目只会被取出一次，
//! 回复、超时、断线三者谁先到谁生效，后到者是空操作。

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::RpcError;

/// 回复槽
type ReplySlot = oneshot::Sender<Result<Value, RpcError>>;

struct PendingCall {
    method: String,
    deadline: Instant,
    slot: ReplySlot,
}

#[derive(Default)]
struct Table {
    calls: HashMap<String, PendingCall>,
    /// 会话关闭后不再接受新条目
    closed: bool,
}

/// 待响应调用表
#[derive(Clone, Default)]
pub struct PendingCalls {
    inner: Arc<Mutex<Table>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一次调用，截止时间为 now + timeout
    pub async fn insert(
        &self,
        id: &str,
        method: &str,
        timeout: Duration,
    ) -> Result<ReplyWaiter, RpcError> {
        let mut table = self.inner.lock().await;
        if table.closed {
            return Err(RpcError::connection_lost());
        }
        if table.calls.contains_key(id) {
            return Err(RpcError::invalid_request(format!("重复的请求 ID: {}", id)));
        }

        let (tx, rx) = oneshot::channel();
        let deadline = Instant::now() + timeout;
        table.calls.insert(
            id.to_string(),
            PendingCall {
                method: method.to_string(),
                deadline,
                slot: tx,
            },
        );
        Ok(ReplyWaiter {
            id: id.to_string(),
            method: method.to_string(),
            deadline,
            receiver: rx,
            pending: self.clone(),
            settled: false,
        })
    }

    /// 用回复结果完成调用；ID 未知（迟到、重复）时返回 false
    pub async fn resolve(&self, id: &str, result: Result<Value, RpcError>) -> bool {
        let call = {
            let mut table = self.inner.lock().await;
            table.calls.remove(id)
        };

        let Some(call) = call else {
            warn!("收到未预期的响应，丢弃: {}", id);
            return false;
        };

        if Instant::now() > call.deadline {
            debug!("响应晚于截止时间到达: method={}, id={}", call.method, id);
        }
        if call.slot.send(result).is_err() {
            debug!("等待者已放弃: method={}, id={}", call.method, id);
        }
        true
    }

    /// 移除条目
    pub async fn remove(&self, id: &str) -> bool {
        let mut table = self.inner.lock().await;
        table.calls.remove(id).is_some()
    }

    /// 关闭表并以同一错误完成所有未决调用，返回被终止的调用数
    pub async fn fail_all(&self, err: RpcError) -> usize {
        let calls: Vec<(String, PendingCall)> = {
            let mut table = self.inner.lock().await;
            table.closed = true;
            table.calls.drain().collect()
        };

        let count = calls.len();
        for (id, call) in calls {
            debug!("终止待处理请求: method={}, id={}", call.method, id);
            let _ = call.slot.send(Err(err.clone()));
        }
        count
    }

    /// 获取待处理请求数量
    pub async fn len(&self) -> usize {
        let table = self.inner.lock().await;
        table.calls.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn is_closed(&self) -> bool {
        let table = self.inner.lock().await;
        table.closed
    }
}

/// 单次调用的等待端
///
/// 未完成就被丢弃时（调用方取消了等待），会异步清理表中的条目。
pub struct ReplyWaiter {
    id: String,
    method: String,
    deadline: Instant,
    receiver: oneshot::Receiver<Result<Value, RpcError>>,
    pending: PendingCalls,
    settled: bool,
}

impl ReplyWaiter {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// 等待回复、超时或断线
    pub async fn wait(mut self) -> Result<Value, RpcError> {
        let result = match tokio::time::timeout_at(self.deadline, &mut self.receiver).await {
            Ok(Ok(result)) => result,
            // 回复槽被丢弃只会发生在表被整体清空时
            Ok(Err(_)) => Err(RpcError::connection_lost()),
            Err(_) => {
                self.pending.remove(&self.id).await;
                warn!("⏰ 请求超时: method={}, id={}", self.method, self.id);
                Err(RpcError::timeout(format!(
                    "请求超时: method={}, id={}",
                    self.method, self.id
                )))
            }
        };
        self.settled = true;
        result
    }

    /// 放弃等待并立即移除条目
    pub async fn cancel(mut self) {
        self.pending.remove(&self.id).await;
        self.settled = true;
    }
}

impl Drop for ReplyWaiter {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let pending = self.pending.clone();
        let id = std::mem::take(&mut self.id);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                pending.remove(&id).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RpcErrorCode;
    use serde_json::json;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_resolve_once() {
        let pending = PendingCalls::new();
        let waiter = pending.insert("req-1", "multiply", TIMEOUT).await.unwrap();
        assert_eq!(pending.len().await, 1);

        assert!(pending.resolve("req-1", Ok(json!(30))).await);
        // 第二次完成是空操作
        assert!(!pending.resolve("req-1", Ok(json!(31))).await);

        assert_eq!(waiter.wait().await.unwrap(), json!(30));
        assert!(pending.is_empty().await);
    }

    #[tokio::test]
    async fn test_unknown_id_dropped() {
        let pending = PendingCalls::new();
        assert!(!pending.resolve("req-missing", Ok(Value::Null)).await);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let pending = PendingCalls::new();
        let _waiter = pending.insert("req-1", "a", TIMEOUT).await.unwrap();
        let err = pending.insert("req-1", "b", TIMEOUT).await.err().unwrap();
        assert_eq!(err.code, RpcErrorCode::InvalidRequest);
    }

    #[tokio::test]
    async fn test_fail_all_closes_table() {
        let pending = PendingCalls::new();
        let w1 = pending.insert("req-1", "a", TIMEOUT).await.unwrap();
        let w2 = pending.insert("req-2", "b", TIMEOUT).await.unwrap();

        assert_eq!(pending.fail_all(RpcError::connection_lost()).await, 2);
        assert!(w1.wait().await.unwrap_err().is_connection_lost());
        assert!(w2.wait().await.unwrap_err().is_connection_lost());

        assert!(pending.is_closed().await);
        let err = pending.insert("req-3", "c", TIMEOUT).await.err().unwrap();
        assert!(err.is_connection_lost());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_evicts_entry() {
        let pending = PendingCalls::new();
        for i in 0..100 {
            let id = format!("req-{}", i);
            let waiter = pending
                .insert(&id, "slow", Duration::from_millis(10))
                .await
                .unwrap();
            let err = waiter.wait().await.unwrap_err();
            assert!(err.is_timeout());
        }
        assert!(pending.is_empty().await);
        assert!(!pending.resolve("req-0", Ok(Value::Null)).await);
    }

    #[tokio::test]
    async fn test_dropped_waiter_cleans_up() {
        let pending = PendingCalls::new();
        let waiter = pending.insert("req-1", "a", TIMEOUT).await.unwrap();
        drop(waiter);

        for _ in 0..10 {
            if pending.is_empty().await {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("pending entry leaked");
    }

    #[tokio::test]
    async fn test_cancel_removes_immediately() {
        let pending = PendingCalls::new();
        let waiter = pending.insert("req-1", "a", TIMEOUT).await.unwrap();
        waiter.cancel().await;
        assert!(pending.is_empty().await);
    }
}
