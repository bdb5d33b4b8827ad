//! RPC 调用错误定义
//!
//! `RpcError` 是一次调用的失败结果，既用于本地（超时、断线），
//! 也用于还原对端回传的错误响应。

use serde::{Deserialize, Serialize};
use std::fmt;

/// RPC 错误码
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RpcErrorCode {
    /// 对端没有注册该方法
    MethodNotFound,
    /// 对端方法执行失败
    RemoteExecution,
    /// 超过调用超时时间仍未收到回复
    Timeout,
    /// 调用未完成时连接已断开
    ConnectionLost,
    /// 没有可用连接
    NotConnected,
    /// 消息无法解码
    Decode,
    /// 请求格式不合法
    InvalidRequest,
}

impl RpcErrorCode {
    /// 转换为字符串码
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MethodNotFound => "METHOD_NOT_FOUND",
            Self::RemoteExecution => "REMOTE_EXECUTION",
            Self::Timeout => "TIMEOUT",
            Self::ConnectionLost => "CONNECTION_LOST",
            Self::NotConnected => "NOT_CONNECTED",
            Self::Decode => "DECODE",
            Self::InvalidRequest => "INVALID_REQUEST",
        }
    }

    /// 是否是对端回传的错误（连接仍然可用）
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::MethodNotFound | Self::RemoteExecution)
    }
}

impl Default for RpcErrorCode {
    fn default() -> Self {
        Self::RemoteExecution
    }
}

impl fmt::Display for RpcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// RPC 错误
///
/// `Display` 只输出 `message`，对端方法抛出的错误文本原样呈现给调用方。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    pub code: RpcErrorCode,
    pub message: String,
}

impl RpcError {
    /// 创建新的 RPC 错误
    pub fn new(code: RpcErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// 方法不存在错误
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            RpcErrorCode::MethodNotFound,
            format!("Method '{}' not found", method),
        )
    }

    /// 方法执行失败
    pub fn remote_execution(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::RemoteExecution, message)
    }

    /// 超时错误
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::Timeout, message)
    }

    /// 连接断开错误
    pub fn connection_lost() -> Self {
        Self::new(RpcErrorCode::ConnectionLost, "连接已断开")
    }

    /// 无可用连接
    pub fn not_connected() -> Self {
        Self::new(RpcErrorCode::NotConnected, "没有可用的连接")
    }

    /// 解码错误
    pub fn decode(err: impl fmt::Display) -> Self {
        Self::new(RpcErrorCode::Decode, format!("解码错误: {}", err))
    }

    /// 无效请求错误
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::InvalidRequest, message)
    }

    pub fn is_timeout(&self) -> bool {
        self.code == RpcErrorCode::Timeout
    }

    pub fn is_connection_lost(&self) -> bool {
        self.code == RpcErrorCode::ConnectionLost
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RpcError {}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        Self::decode(err)
    }
}
