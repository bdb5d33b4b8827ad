//! 请求分发器
//!
//! 根据方法名执行本地方法，将成功或失败转换为回复消息。

use futures_util::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tracing::{debug, info, warn};

use crate::error::RpcError;
use crate::message::RpcMessage;
use crate::registry::MethodRegistry;

/// 方法执行结果
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Value),
    Failure(RpcError),
}

impl Outcome {
    /// 生成携带原请求 ID 的回复消息
    pub fn into_reply(self, id: impl Into<String>) -> RpcMessage {
        match self {
            Outcome::Success(value) => RpcMessage::response(id, value),
            Outcome::Failure(err) => RpcMessage::error_response(id, &err),
        }
    }
}

/// 请求分发器
#[derive(Clone)]
pub struct Dispatcher {
    registry: MethodRegistry,
}

impl Dispatcher {
    pub fn new(registry: MethodRegistry) -> Self {
        Self { registry }
    }

    /// 执行本地方法
    ///
    /// 方法返回的错误和 panic 都只保留文本描述。
    pub async fn dispatch(&self, method: &str, args: Vec<Value>) -> Outcome {
        let Some(handler) = self.registry.lookup(method).await else {
            warn!("❌ [方法不存在] method={}", method);
            return Outcome::Failure(RpcError::method_not_found(method));
        };

        let result = AssertUnwindSafe(async move { handler(args).await })
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(value)) => Outcome::Success(value),
            Ok(Err(err)) => {
                warn!("❌ [方法执行失败] method={}, error={}", method, err);
                Outcome::Failure(RpcError::remote_execution(err.to_string()))
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!("❌ [方法 panic] method={}, panic={}", method, message);
                Outcome::Failure(RpcError::remote_execution(message))
            }
        }
    }

    /// 处理 RPC 请求，返回回复消息；非请求消息返回 `None`
    pub async fn handle_request(&self, msg: RpcMessage) -> Option<RpcMessage> {
        let RpcMessage::Request { id, method, args } = msg else {
            return None;
        };

        info!("📨 [收到RPC请求] method={}, id={}", method, id);
        debug!("📨 请求参数: {:?}", args);

        let outcome = self.dispatch(&method, args).await;
        if let Outcome::Success(ref value) = outcome {
            info!("✅ [RPC处理成功] method={}, id={}", method, id);
            debug!("✅ 响应内容: {}", value);
        }
        Some(outcome.into_reply(id))
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "method panicked".to_string()
    }
}
