//! Duplex RPC - 基于 WebSocket 的双向 RPC 引擎
//!
//! 任意一端既可以监听也可以发起连接，并且两端都能注册本地方法、调用对端方法。

pub mod codec;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod errors;
pub mod message;
pub mod node;
pub mod pending;
pub mod registry;
pub mod session;

// 重新导出常用类型
pub use config::{NodeConfig, Role};
pub use dispatcher::{Dispatcher, Outcome};
pub use error::{RpcError, RpcErrorCode};
pub use errors::{Error, Result};
pub use message::{MessageType, RpcMessage};
pub use node::{Node, NodeState};
pub use registry::{arg, MethodRegistry, MethodResult};
pub use session::{Session, SessionOptions};
