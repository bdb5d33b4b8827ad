//! 连接会话
//!
//! 一条 WebSocket 连接对应一个会话：独立的发送队列、待响应调用表和接收循环。
//! 会话结束时，所有未完成的调用以 `CONNECTION_LOST` 失败。

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::codec::{self, Inbound};
use crate::dispatcher::Dispatcher;
use crate::error::RpcError;
use crate::message::RpcMessage;
use crate::pending::PendingCalls;

/// 关闭时等待发送任务/分发任务收尾的最长时间
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// 会话参数
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// WebSocket Ping 间隔，`None` 表示不发送心跳
    pub heartbeat_interval: Option<Duration>,
    /// 收到无法解析的消息时是否关闭连接
    pub close_on_decode_error: bool,
}

/// 连接会话
pub struct Session {
    id: String,
    peer: String,
    sender: mpsc::UnboundedSender<RpcMessage>,
    pending: PendingCalls,
    cancel: CancellationToken,
}

impl Session {
    /// 接管一条已完成握手的 WebSocket 连接，启动发送任务和接收循环
    ///
    /// 返回的 `JoinHandle` 在会话彻底结束（未决调用已失败、分发任务已终止）后完成。
    pub fn spawn<S>(
        ws: WebSocketStream<S>,
        peer: impl Into<String>,
        dispatcher: Dispatcher,
        options: SessionOptions,
        parent: &CancellationToken,
    ) -> (Arc<Session>, JoinHandle<()>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (ws_sender, ws_receiver) = ws.split();
        let (tx, rx) = mpsc::unbounded_channel();

        let session = Arc::new(Session {
            id: format!("session-{}", Uuid::new_v4()),
            peer: peer.into(),
            sender: tx,
            pending: PendingCalls::new(),
            cancel: parent.child_token(),
        });

        let send_task = tokio::spawn(send_loop(
            ws_sender,
            rx,
            session.cancel.clone(),
            options.heartbeat_interval,
        ));
        let handle = tokio::spawn(
            session
                .clone()
                .receive_loop(ws_receiver, send_task, dispatcher, options),
        );

        (session, handle)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 未完成的调用数量
    pub async fn pending_count(&self) -> usize {
        self.pending.len().await
    }

    /// 请求关闭会话（不等待）
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// 将消息放入发送队列
    pub fn send(&self, msg: RpcMessage) -> Result<(), RpcError> {
        if self.cancel.is_cancelled() {
            return Err(RpcError::connection_lost());
        }
        self.sender
            .send(msg)
            .map_err(|_| RpcError::connection_lost())
    }

    /// 发送请求并等待响应
    pub async fn call(
        &self,
        method: &str,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        let msg = RpcMessage::request(method, args);
        let waiter = self.pending.insert(msg.id(), method, timeout).await?;

        info!(
            "📤 [发送请求] session={}, method={}, id={}",
            self.id,
            method,
            waiter.id()
        );

        if let Err(err) = self.send(msg) {
            waiter.cancel().await;
            return Err(err);
        }

        waiter.wait().await
    }

    async fn receive_loop<S>(
        self: Arc<Self>,
        mut ws_receiver: SplitStream<WebSocketStream<S>>,
        mut send_task: JoinHandle<()>,
        dispatcher: Dispatcher,
        options: SessionOptions,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        info!("🔗 会话建立: session={}, peer={}", self.id, self.peer);

        let mut dispatches = JoinSet::new();
        let mut send_finished = false;

        let reason = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break "本地关闭",
                _ = &mut send_task => {
                    send_finished = true;
                    break "发送通道已结束";
                }
                Some(_) = dispatches.join_next(), if !dispatches.is_empty() => {}
                next = ws_receiver.next() => {
                    let ws_msg = match next {
                        Some(Ok(ws_msg)) => ws_msg,
                        Some(Err(e)) => {
                            error!("接收消息错误: session={}, error={}", self.id, e);
                            break "读取失败";
                        }
                        None => break "对端关闭连接",
                    };

                    match codec::decode(ws_msg) {
                        Ok(Inbound::Message(msg)) => Self::route(&self, msg, &dispatcher, &mut dispatches).await,
                        Ok(Inbound::Control) => {}
                        Ok(Inbound::Close) => break "对端关闭连接",
                        Err(e) => {
                            warn!("丢弃无法解析的消息: session={}, error={}", self.id, e);
                            if options.close_on_decode_error {
                                break "消息解析失败";
                            }
                        }
                    }
                }
            }
        };

        self.cancel.cancel();
        let failed = self.pending.fail_all(RpcError::connection_lost()).await;

        dispatches.abort_all();
        let drained = tokio::time::timeout(CLOSE_GRACE, async {
            while dispatches.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            // 阻塞中的同步方法无法中止，任其自行结束
            warn!("分发任务未能及时结束: session={}", self.id);
            dispatches.detach_all();
        }

        if !send_finished && tokio::time::timeout(CLOSE_GRACE, &mut send_task).await.is_err() {
            send_task.abort();
        }

        if failed > 0 {
            warn!(
                "会话关闭: session={}, reason={}, 终止 {} 个未完成调用",
                self.id, reason, failed
            );
        } else {
            info!("会话关闭: session={}, reason={}", self.id, reason);
        }
    }

    /// 入站请求交给分发器并发执行；入站回复交给待响应调用表
    async fn route(
        session: &Arc<Session>,
        msg: RpcMessage,
        dispatcher: &Dispatcher,
        dispatches: &mut JoinSet<()>,
    ) {
        match msg {
            RpcMessage::Request { .. } => {
                let dispatcher = dispatcher.clone();
                let session = session.clone();
                dispatches.spawn(async move {
                    let Some(reply) = dispatcher.handle_request(msg).await else {
                        return;
                    };
                    if let Err(e) = session.send(reply) {
                        debug!("回复未发送: session={}, error={}", session.id, e);
                    }
                });
            }
            reply => {
                if let Some((id, result)) = reply.into_reply() {
                    debug!("📥 收到响应: session={}, id={}", session.id, id);
                    session.pending.resolve(&id, result).await;
                }
            }
        }
    }
}

/// 发送任务：串行写出队列中的消息，按需发送心跳
async fn send_loop<S>(
    mut ws_sender: SplitSink<WebSocketStream<S>, WsMessage>,
    mut rx: mpsc::UnboundedReceiver<RpcMessage>,
    cancel: CancellationToken,
    heartbeat_interval: Option<Duration>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut heartbeat = heartbeat_interval.map(|period| {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval
    });

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = async {
                match heartbeat.as_mut() {
                    Some(interval) => {
                        interval.tick().await;
                    }
                    None => std::future::pending::<()>().await,
                }
            } => {
                if let Err(e) = ws_sender.send(WsMessage::Ping(Vec::new())).await {
                    error!("发送心跳失败: {}", e);
                    return;
                }
                debug!("发送心跳");
            }
            msg = rx.recv() => {
                let Some(msg) = msg else { break };
                let frame = match codec::encode(&msg) {
                    Ok(frame) => frame,
                    Err(e) => {
                        error!("序列化消息失败: id={}, error={}", msg.id(), e);
                        continue;
                    }
                };
                if let Err(e) = ws_sender.send(frame).await {
                    error!("发送消息失败: {}", e);
                    return;
                }
            }
        }
    }

    let _ = ws_sender.close().await;
    debug!("发送任务结束");
}
