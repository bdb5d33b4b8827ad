//! 消息编解码：`RpcMessage` <-> WebSocket 消息

use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::error::RpcError;
use crate::message::RpcMessage;

/// 解码后的入站帧
#[derive(Debug)]
pub enum Inbound {
    /// RPC 消息
    Message(RpcMessage),
    /// Ping/Pong 等控制帧，由 tungstenite 自行应答
    Control,
    /// 对端发起关闭
    Close,
}

/// 编码 RPC 消息为 WebSocket 文本消息
pub fn encode(msg: &RpcMessage) -> Result<WsMessage, RpcError> {
    let json = msg.to_json()?;
    Ok(WsMessage::Text(json))
}

/// 解码 WebSocket 消息
///
/// 文本与二进制（UTF-8 JSON）都可以承载 RPC 消息；格式错误返回 `Decode` 错误，
/// 由接收循环丢弃并记录。
pub fn decode(ws_msg: WsMessage) -> Result<Inbound, RpcError> {
    match ws_msg {
        WsMessage::Text(text) => Ok(Inbound::Message(RpcMessage::from_json(&text)?)),
        WsMessage::Binary(data) => {
            let text = String::from_utf8(data).map_err(RpcError::decode)?;
            Ok(Inbound::Message(RpcMessage::from_json(&text)?))
        }
        WsMessage::Close(_) => Ok(Inbound::Close),
        WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => Ok(Inbound::Control),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RpcErrorCode;
    use serde_json::json;

    #[test]
    fn test_encode_is_text_json() {
        let msg = RpcMessage::response("req-1", json!(30));
        match encode(&msg).unwrap() {
            WsMessage::Text(text) => {
                assert_eq!(RpcMessage::from_json(&text).unwrap(), msg);
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_decode_binary_json() {
        let msg = RpcMessage::request("echo", vec![json!("hi")]);
        let bytes = msg.to_json().unwrap().into_bytes();
        match decode(WsMessage::Binary(bytes)).unwrap() {
            Inbound::Message(decoded) => assert_eq!(decoded, msg),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_decode_malformed() {
        let err = decode(WsMessage::Text("{\"kind\":".to_string())).unwrap_err();
        assert_eq!(err.code, RpcErrorCode::Decode);

        let err = decode(WsMessage::Binary(vec![0xff, 0xfe])).unwrap_err();
        assert_eq!(err.code, RpcErrorCode::Decode);
    }

    #[test]
    fn test_decode_control_and_close() {
        assert!(matches!(decode(WsMessage::Ping(vec![1])).unwrap(), Inbound::Control));
        assert!(matches!(decode(WsMessage::Close(None)).unwrap(), Inbound::Close));
    }
}
