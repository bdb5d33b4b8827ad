use thiserror::Error;

use crate::error::RpcError;

/// 节点级错误（注册、启动、配置）
#[derive(Error, Debug)]
pub enum Error {
    #[error("方法已注册: {0}")]
    DuplicateMethod(String),

    #[error("节点已在运行: {0}")]
    AlreadyRunning(String),

    #[error("监听 {addr} 失败: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("配置错误: {0}")]
    InvalidConfig(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Rpc(#[from] RpcError),
}

/// 统一结果类型
pub type Result<T> = std::result::Result<T, Error>;
