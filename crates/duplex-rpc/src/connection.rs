//! 连接管理
//!
//! 监听端：接受任意数量的连接，每条连接一个会话。
//! 发起端：单连接，断开后按固定间隔重连，直到节点停止。

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_tungstenite::{accept_async, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::RpcError;
use crate::errors::{Error, Result};
use crate::session::{Session, SessionOptions};

/// 活动会话集合
///
/// `active` 指向默认会话：发起端为唯一的连接，监听端为最近接入且仍存活的连接。
#[derive(Clone)]
pub struct SessionSet {
    /// 会话 ID -> (接入序号, 会话)
    sessions: Arc<RwLock<HashMap<String, (u64, Arc<Session>)>>>,
    next_seq: Arc<AtomicU64>,
    active: Arc<watch::Sender<Option<Arc<Session>>>>,
}

impl SessionSet {
    pub fn new() -> Self {
        let (active, _) = watch::channel(None);
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            next_seq: Arc::new(AtomicU64::new(0)),
            active: Arc::new(active),
        }
    }

    pub async fn add(&self, session: Arc<Session>) {
        let mut sessions = self.sessions.write().await;
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        sessions.insert(session.id().to_string(), (seq, session.clone()));
        self.active.send_replace(Some(session));
    }

    pub async fn remove(&self, session_id: &str) {
        let mut sessions = self.sessions.write().await;
        sessions.remove(session_id);

        let is_active = self
            .active
            .borrow()
            .as_ref()
            .map_or(false, |s| s.id() == session_id);
        if is_active {
            // 回退到最近接入且仍存活的会话
            let next = sessions
                .values()
                .filter(|(_, s)| !s.is_closed())
                .max_by_key(|(seq, _)| *seq)
                .map(|(_, s)| s.clone());
            self.active.send_replace(next);
        }
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).map(|(_, s)| s.clone())
    }

    pub async fn ids(&self) -> Vec<String> {
        let sessions = self.sessions.read().await;
        let mut ids: Vec<String> = sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// 当前默认会话
    pub fn active(&self) -> Option<Arc<Session>> {
        self.active
            .borrow()
            .as_ref()
            .filter(|s| !s.is_closed())
            .cloned()
    }

    /// 等待出现可用会话，最迟到 `deadline`；`cancel` 触发时立即返回
    pub async fn wait_active(
        &self,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> std::result::Result<Arc<Session>, RpcError> {
        if let Some(session) = self.active() {
            return Ok(session);
        }

        let mut rx = self.active.subscribe();
        let wait = async {
            let guard = rx
                .wait_for(|s| s.as_ref().map_or(false, |s| !s.is_closed()))
                .await
                .ok()?;
            (*guard).clone()
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(RpcError::not_connected()),
            found = tokio::time::timeout_at(deadline, wait) => match found {
                Ok(Some(session)) => Ok(session),
                _ => Err(RpcError::not_connected()),
            },
        }
    }

    /// 所有会话的未完成调用总数
    pub async fn pending_calls(&self) -> usize {
        let sessions: Vec<Arc<Session>> = {
            let sessions = self.sessions.read().await;
            sessions.values().map(|(_, s)| s.clone()).collect()
        };
        let mut total = 0;
        for session in sessions {
            total += session.pending_count().await;
        }
        total
    }
}

impl Default for SessionSet {
    fn default() -> Self {
        Self::new()
    }
}

/// 会话所需的共享上下文
#[derive(Clone)]
pub(crate) struct ConnectionContext {
    pub dispatcher: Dispatcher,
    pub options: SessionOptions,
    pub sessions: SessionSet,
}

impl ConnectionContext {
    /// 运行一个会话直到结束，期间登记在会话集合中
    async fn run_session(&self, session: Arc<Session>, handle: tokio::task::JoinHandle<()>) {
        self.sessions.add(session.clone()).await;
        if let Err(e) = handle.await {
            error!(
                "会话任务异常: session={}, peer={}, error={}",
                session.id(),
                session.peer(),
                e
            );
        }
        self.sessions.remove(session.id()).await;
    }
}

/// 绑定监听地址
pub(crate) async fn bind(host: &str, port: u16) -> Result<TcpListener> {
    let addr = format!("{}:{}", host, port);
    TcpListener::bind(&addr)
        .await
        .map_err(|source| Error::Bind { addr, source })
}

/// 监听端主循环
pub(crate) async fn accept_loop(
    listener: TcpListener,
    ctx: ConnectionContext,
    cancel: CancellationToken,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    debug!("新的 TCP 连接: {}", addr);
                    connections.spawn(serve_connection(stream, addr, ctx.clone(), cancel.clone()));
                }
                Err(e) => {
                    warn!("接受连接失败: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    drop(listener);
    while connections.join_next().await.is_some() {}
    debug!("监听循环结束");
}

async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: ConnectionContext,
    cancel: CancellationToken,
) {
    let handshake = tokio::select! {
        _ = cancel.cancelled() => return,
        ws = accept_async(stream) => ws,
    };
    let ws = match handshake {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket 握手失败: peer={}, error={}", addr, e);
            return;
        }
    };

    info!("新的 WebSocket 连接: {}", addr);
    let (session, handle) = Session::spawn(
        ws,
        addr.to_string(),
        ctx.dispatcher.clone(),
        ctx.options.clone(),
        &cancel,
    );
    ctx.run_session(session, handle).await;
    info!("连接已关闭: {}", addr);
}

/// 发起端主循环：连接、运行会话、断开后等待重连
pub(crate) async fn connect_loop(
    url: String,
    reconnect_interval: Duration,
    ctx: ConnectionContext,
    cancel: CancellationToken,
) {
    loop {
        info!("尝试连接到: {}", url);

        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            result = connect_async(url.as_str()) => result,
        };

        match connected {
            Ok((ws, _)) => {
                info!("✅ WebSocket 连接成功: {}", url);
                let (session, handle) = Session::spawn(
                    ws,
                    url.clone(),
                    ctx.dispatcher.clone(),
                    ctx.options.clone(),
                    &cancel,
                );
                ctx.run_session(session, handle).await;
            }
            Err(e) => {
                warn!("连接失败: {}", e);
            }
        }

        if cancel.is_cancelled() {
            break;
        }

        warn!("{:?} 后重新连接...", reconnect_interval);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(reconnect_interval) => {}
        }
    }

    debug!("重连循环结束");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MethodRegistry;
    use crate::session::tests::session_pair;

    #[tokio::test]
    async fn test_active_follows_add_and_remove() {
        let (s1, _h1, s2, _h2, _root) =
            session_pair(MethodRegistry::new(), MethodRegistry::new()).await;
        let set = SessionSet::new();
        assert!(set.active().is_none());

        set.add(s1.clone()).await;
        set.add(s2.clone()).await;
        assert_eq!(set.active().unwrap().id(), s2.id());
        assert_eq!(set.ids().await.len(), 2);

        set.remove(s2.id()).await;
        assert_eq!(set.active().unwrap().id(), s1.id());

        set.remove(s1.id()).await;
        assert!(set.active().is_none());
        assert!(set.get(s1.id()).await.is_none());
    }

    #[tokio::test]
    async fn test_active_falls_back_to_newest_live_session() {
        let (a1, _ha1, a2, _ha2, _root_a) =
            session_pair(MethodRegistry::new(), MethodRegistry::new()).await;
        let (b1, _hb1, b2, _hb2, _root_b) =
            session_pair(MethodRegistry::new(), MethodRegistry::new()).await;
        let order = [a1, b1, a2, b2];

        let set = SessionSet::new();
        for session in &order {
            set.add(session.clone()).await;
        }

        // 依次移除最新的会话，默认会话总是按接入顺序回退
        for i in (1..order.len()).rev() {
            set.remove(order[i].id()).await;
            assert_eq!(set.active().unwrap().id(), order[i - 1].id());
        }

        // 已关闭的会话不会被选中
        set.add(order[1].clone()).await;
        set.add(order[2].clone()).await;
        order[1].close();
        set.remove(order[2].id()).await;
        assert_eq!(set.active().unwrap().id(), order[0].id());
    }

    #[tokio::test]
    async fn test_wait_active_times_out() {
        let set = SessionSet::new();
        let cancel = CancellationToken::new();
        let deadline = Instant::now() + Duration::from_millis(30);
        let err = set.wait_active(deadline, &cancel).await.err().unwrap();
        assert_eq!(err.code, crate::error::RpcErrorCode::NotConnected);
    }

    #[tokio::test]
    async fn test_wait_active_wakes_on_add() {
        let (s1, _h1, _s2, _h2, _root) =
            session_pair(MethodRegistry::new(), MethodRegistry::new()).await;
        let set = SessionSet::new();
        let cancel = CancellationToken::new();

        let waiter = {
            let set = set.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let deadline = Instant::now() + Duration::from_secs(2);
                set.wait_active(deadline, &cancel).await.map(|s| s.id().to_string())
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        set.add(s1.clone()).await;

        assert_eq!(waiter.await.unwrap().unwrap(), s1.id());
    }

    #[tokio::test]
    async fn test_wait_active_cancelled() {
        let set = SessionSet::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let deadline = Instant::now() + Duration::from_secs(10);
        assert!(set.wait_active(deadline, &cancel).await.is_err());
    }
}
