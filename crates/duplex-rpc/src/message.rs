//! RPC 消息（线上信封）定义
//!
//! 三种消息共用一个 JSON 对象，以 `kind` 字段区分：
//! `request` / `response` / `error`。

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{RpcError, RpcErrorCode};

/// RPC 消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// 请求消息（期望响应）
    Request,
    /// 成功响应
    Response,
    /// 错误响应
    Error,
}

/// RPC 消息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RpcMessage {
    Request {
        /// 关联 ID
        id: String,
        /// RPC 方法名
        method: String,
        /// 位置参数
        #[serde(default)]
        args: Vec<Value>,
    },
    Response {
        id: String,
        #[serde(default)]
        result: Value,
    },
    Error {
        id: String,
        /// 错误描述（调用方看到的错误文本）
        error: String,
        /// 错误码，缺省视为方法执行失败
        #[serde(default)]
        code: RpcErrorCode,
    },
}

impl RpcMessage {
    /// 创建请求消息，分配新的关联 ID
    pub fn request(method: impl Into<String>, args: Vec<Value>) -> Self {
        Self::Request {
            id: format!("req-{}", Uuid::new_v4()),
            method: method.into(),
            args,
        }
    }

    /// 创建响应消息
    pub fn response(id: impl Into<String>, result: Value) -> Self {
        Self::Response {
            id: id.into(),
            result,
        }
    }

    /// 创建错误响应消息
    pub fn error_response(id: impl Into<String>, err: &RpcError) -> Self {
        Self::Error {
            id: id.into(),
            error: err.message.clone(),
            code: err.code,
        }
    }

    /// 关联 ID
    pub fn id(&self) -> &str {
        match self {
            Self::Request { id, .. } | Self::Response { id, .. } | Self::Error { id, .. } => id,
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Request { .. } => MessageType::Request,
            Self::Response { .. } => MessageType::Response,
            Self::Error { .. } => MessageType::Error,
        }
    }

    /// 序列化为 JSON 字符串
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// 从 JSON 字符串反序列化
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// 判断是否是成功响应
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Response { .. })
    }

    /// 判断是否是错误响应
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// 将回复转换为调用结果；请求消息返回 `None`
    pub fn into_reply(self) -> Option<(String, Result<Value, RpcError>)> {
        match self {
            Self::Request { .. } => None,
            Self::Response { id, result } => Some((id, Ok(result))),
            Self::Error { id, error, code } => Some((id, Err(RpcError::new(code, error)))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_message() {
        let msg = RpcMessage::request("multiply", vec![json!(5), json!(6)]);
        assert_eq!(msg.message_type(), MessageType::Request);
        assert!(msg.id().starts_with("req-"));

        let other = RpcMessage::request("multiply", vec![]);
        assert_ne!(msg.id(), other.id());
    }

    #[test]
    fn test_response_message() {
        let msg = RpcMessage::response("req-123", json!({"result": "ok"}));
        assert_eq!(msg.id(), "req-123");
        assert!(msg.is_success());
        assert!(!msg.is_error());
    }

    #[test]
    fn test_error_response() {
        let msg = RpcMessage::error_response("req-123", &RpcError::remote_execution("boom"));
        assert!(msg.is_error());

        let (id, result) = msg.into_reply().unwrap();
        assert_eq!(id, "req-123");
        let err = result.unwrap_err();
        assert_eq!(err.code, RpcErrorCode::RemoteExecution);
        assert_eq!(err.message, "boom");
    }

    #[test]
    fn test_wire_layout() {
        let msg = RpcMessage::Request {
            id: "req-1".to_string(),
            method: "add".to_string(),
            args: vec![json!(1), json!("two"), json!(null)],
        };
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"kind": "request", "id": "req-1", "method": "add", "args": [1, "two", null]})
        );

        let err = RpcMessage::error_response("req-1", &RpcError::method_not_found("add"));
        let value: Value = serde_json::from_str(&err.to_json().unwrap()).unwrap();
        assert_eq!(value["kind"], "error");
        assert_eq!(value["code"], "METHOD_NOT_FOUND");
        assert_eq!(value["error"], "Method 'add' not found");
    }

    #[test]
    fn test_minimal_fields_default() {
        let msg = RpcMessage::from_json(r#"{"kind":"request","id":"a","method":"ping"}"#).unwrap();
        assert_eq!(
            msg,
            RpcMessage::Request {
                id: "a".to_string(),
                method: "ping".to_string(),
                args: vec![]
            }
        );

        let msg = RpcMessage::from_json(r#"{"kind":"error","id":"b","error":"bad"}"#).unwrap();
        let (_, result) = msg.into_reply().unwrap();
        assert_eq!(result.unwrap_err().code, RpcErrorCode::RemoteExecution);
    }

    #[test]
    fn test_nested_result_survives() {
        let result = json!({"list": [1, 2.5, true, null], "map": {"k": "v"}});
        let msg = RpcMessage::response("req-9", result.clone());
        let parsed = RpcMessage::from_json(&msg.to_json().unwrap()).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        assert!(RpcMessage::from_json(r#"{"kind":"stream","id":"x"}"#).is_err());
        assert!(RpcMessage::from_json("not json").is_err());
    }
}
