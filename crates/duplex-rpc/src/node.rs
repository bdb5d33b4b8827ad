//! RPC 节点
//!
//! 组合方法注册表、分发器和连接管理，负责启动与停止。
//! 两种角色都可以注册本地方法，也都可以调用对端方法。

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{NodeConfig, Role};
use crate::connection::{self, ConnectionContext, SessionSet};
use crate::dispatcher::Dispatcher;
use crate::error::RpcError;
use crate::errors::{Error, Result};
use crate::registry::{MethodRegistry, MethodResult};
use crate::session::Session;

/// 节点状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Idle,
    Running,
    Stopped,
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    local_addr: Option<SocketAddr>,
}

enum Lifecycle {
    Idle,
    Running(Running),
    Stopped,
}

/// RPC 节点
pub struct Node {
    config: NodeConfig,
    registry: MethodRegistry,
    sessions: SessionSet,
    lifecycle: Mutex<Lifecycle>,
}

impl Node {
    pub fn new(config: NodeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            registry: MethodRegistry::new(),
            sessions: SessionSet::new(),
            lifecycle: Mutex::new(Lifecycle::Idle),
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// 注册同步方法
    pub async fn register_local_method<F>(&self, name: impl Into<String>, handler: F) -> Result<()>
    where
        F: Fn(Vec<Value>) -> MethodResult + Send + Sync + 'static,
    {
        self.registry.register(name, handler).await
    }

    /// 注册异步方法
    pub async fn register_local_async_method<F, Fut>(
        &self,
        name: impl Into<String>,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MethodResult> + Send + 'static,
    {
        self.registry.register_async(name, handler).await
    }

    /// 已注册的方法
    pub async fn methods(&self) -> Vec<String> {
        self.registry.list_methods().await
    }

    /// 启动节点
    ///
    /// 监听端在返回前完成绑定；发起端在后台连接，随后的调用会等待连接建立。
    pub async fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if matches!(*lifecycle, Lifecycle::Running(_)) {
            return Err(Error::AlreadyRunning(self.config.name.clone()));
        }

        let cancel = CancellationToken::new();
        let ctx = ConnectionContext {
            dispatcher: Dispatcher::new(self.registry.clone()),
            options: self.config.session_options(),
            sessions: self.sessions.clone(),
        };

        let (task, local_addr) = match self.config.role {
            Role::Listen => {
                let listener = connection::bind(&self.config.host, self.config.port).await?;
                let local_addr = listener.local_addr().ok();
                info!(
                    "🚀 [{}] 监听 {}",
                    self.config.name,
                    local_addr.map_or_else(|| self.config.host.clone(), |a| a.to_string())
                );
                let task = tokio::spawn(connection::accept_loop(listener, ctx, cancel.clone()));
                (task, local_addr)
            }
            Role::Connect => {
                info!("🚀 [{}] 连接 {}", self.config.name, self.config.url());
                let task = tokio::spawn(connection::connect_loop(
                    self.config.url(),
                    self.config.reconnect_interval,
                    ctx,
                    cancel.clone(),
                ));
                (task, None)
            }
        };

        debug!("[{}] 已注册方法: {:?}", self.config.name, self.methods().await);
        *lifecycle = Lifecycle::Running(Running {
            cancel,
            task,
            local_addr,
        });
        Ok(())
    }

    /// 停止节点
    ///
    /// 关闭所有会话（未完成调用以 `CONNECTION_LOST` 结束）并停止监听或重连；
    /// 返回时不再有分发和重连活动。重复调用是空操作。
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let running = match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            Lifecycle::Running(running) => running,
            previous => {
                *lifecycle = previous;
                return;
            }
        };

        info!("🛑 [{}] 停止节点", self.config.name);
        running.cancel.cancel();
        if let Err(e) = running.task.await {
            warn!("[{}] 连接任务异常结束: {}", self.config.name, e);
        }
        info!("[{}] 节点已停止", self.config.name);
    }

    pub async fn state(&self) -> NodeState {
        match *self.lifecycle.lock().await {
            Lifecycle::Idle => NodeState::Idle,
            Lifecycle::Running(_) => NodeState::Running,
            Lifecycle::Stopped => NodeState::Stopped,
        }
    }

    /// 监听端实际绑定的地址
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.lifecycle.lock().await {
            Lifecycle::Running(running) => running.local_addr,
            _ => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.sessions.active().is_some()
    }

    /// 当前存活的会话 ID
    pub async fn sessions(&self) -> Vec<String> {
        self.sessions.ids().await
    }

    /// 所有会话中尚未完成的调用数
    pub async fn pending_calls(&self) -> usize {
        self.sessions.pending_calls().await
    }

    /// 调用对端方法
    ///
    /// 没有可用连接时最多等待一个调用超时时间；等待连接与等待回复共用同一截止时间。
    pub async fn send_rpc_request(
        &self,
        method: &str,
        args: Vec<Value>,
    ) -> std::result::Result<Value, RpcError> {
        let deadline = Instant::now() + self.config.call_timeout;
        let cancel = self.running_token().await.ok_or_else(RpcError::not_connected)?;
        let session = self.sessions.wait_active(deadline, &cancel).await?;
        self.call_on(&session, method, args, deadline).await
    }

    /// 调用对端方法并反序列化结果
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        args: Vec<Value>,
    ) -> std::result::Result<T, RpcError> {
        let value = self.send_rpc_request(method, args).await?;
        serde_json::from_value(value).map_err(RpcError::decode)
    }

    /// 在指定会话上调用对端方法（监听端选择具体的对端）
    pub async fn call_session(
        &self,
        session_id: &str,
        method: &str,
        args: Vec<Value>,
    ) -> std::result::Result<Value, RpcError> {
        let deadline = Instant::now() + self.config.call_timeout;
        let session = self
            .sessions
            .get(session_id)
            .await
            .ok_or_else(RpcError::not_connected)?;
        self.call_on(&session, method, args, deadline).await
    }

    async fn call_on(
        &self,
        session: &Arc<Session>,
        method: &str,
        args: Vec<Value>,
        deadline: Instant,
    ) -> std::result::Result<Value, RpcError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        session.call(method, args, remaining).await
    }

    async fn running_token(&self) -> Option<CancellationToken> {
        match &*self.lifecycle.lock().await {
            Lifecycle::Running(running) => Some(running.cancel.clone()),
            _ => None,
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        // 未调用 stop() 就被丢弃时，至少让后台任务退出
        if let Lifecycle::Running(running) = self.lifecycle.get_mut() {
            running.cancel.cancel();
        }
    }
}
