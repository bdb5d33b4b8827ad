//! 节点配置

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::{Error, Result};
use crate::session::SessionOptions;

/// 节点角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// 监听端，接受任意数量的连接
    Listen,
    /// 发起端，单连接，自动重连
    Connect,
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(label: &str) -> Result<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "server" | "listen" | "listener" => Ok(Role::Listen),
            "client" | "connect" | "initiator" => Ok(Role::Connect),
            other => Err(Error::InvalidConfig(format!("未知的角色: {}", other))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Listen => write!(f, "listen"),
            Role::Connect => write!(f, "connect"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// 节点名称，仅用于日志
    pub name: String,
    pub role: Role,
    pub host: String,
    pub port: u16,
    /// 发起端连接的 URL 路径
    pub path: String,
    pub reconnect_interval: Duration,
    pub call_timeout: Duration,
    pub heartbeat_interval: Option<Duration>,
    pub close_on_decode_error: bool,
}

impl NodeConfig {
    pub const DEFAULT_HOST: &'static str = "127.0.0.1";
    pub const DEFAULT_PORT: u16 = 9000;
    pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);
    pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

    /// 以角色标签创建配置，标签同时作为节点名称
    pub fn new(role_label: &str, host: impl Into<String>, port: u16) -> Result<Self> {
        let role = role_label.parse()?;
        Ok(Self::with_role(role, host, port).with_name(role_label))
    }

    pub fn listen(host: impl Into<String>, port: u16) -> Self {
        Self::with_role(Role::Listen, host, port)
    }

    pub fn connect(host: impl Into<String>, port: u16) -> Self {
        Self::with_role(Role::Connect, host, port)
    }

    fn with_role(role: Role, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: role.to_string(),
            role,
            host: host.into(),
            port,
            path: "/".to_string(),
            reconnect_interval: Self::DEFAULT_RECONNECT_INTERVAL,
            call_timeout: Self::DEFAULT_CALL_TIMEOUT,
            heartbeat_interval: None,
            close_on_decode_error: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = Some(interval);
        self
    }

    pub fn with_close_on_decode_error(mut self, close: bool) -> Self {
        self.close_on_decode_error = close;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::InvalidConfig("host 不能为空".to_string()));
        }
        if !self.path.starts_with('/') {
            return Err(Error::InvalidConfig(format!(
                "path 必须以 / 开头: {}",
                self.path
            )));
        }
        if self.reconnect_interval.is_zero() {
            return Err(Error::InvalidConfig("reconnect_interval 必须大于 0".to_string()));
        }
        if self.call_timeout.is_zero() {
            return Err(Error::InvalidConfig("call_timeout 必须大于 0".to_string()));
        }
        if self.heartbeat_interval.is_some_and(|d| d.is_zero()) {
            return Err(Error::InvalidConfig("heartbeat_interval 必须大于 0".to_string()));
        }
        Ok(())
    }

    /// 发起端连接地址
    pub fn url(&self) -> String {
        format!("ws://{}:{}{}", self.host, self.port, self.path)
    }

    pub(crate) fn session_options(&self) -> SessionOptions {
        SessionOptions {
            heartbeat_interval: self.heartbeat_interval,
            close_on_decode_error: self.close_on_decode_error,
        }
    }

    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self> {
        let role: Role = env_or("RPC_ROLE", "server").parse()?;
        let host = env_or("RPC_HOST", Self::DEFAULT_HOST);
        let port = env_or("RPC_PORT", &Self::DEFAULT_PORT.to_string())
            .parse()
            .map_err(|e| Error::InvalidConfig(format!("RPC_PORT: {}", e)))?;

        let mut config = Self::with_role(role, host, port)
            .with_name(env_or("RPC_NODE_NAME", &role.to_string()))
            .with_path(env_or("RPC_PATH", "/"));

        if let Some(interval) = env_millis("RPC_RECONNECT_INTERVAL_MS")? {
            config.reconnect_interval = interval;
        }
        if let Some(timeout) = env_millis("RPC_CALL_TIMEOUT_MS")? {
            config.call_timeout = timeout;
        }
        config.heartbeat_interval = env_millis("RPC_HEARTBEAT_INTERVAL_MS")?;

        config.validate()?;
        Ok(config)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_millis(key: &str) -> Result<Option<Duration>> {
    match std::env::var(key) {
        Ok(value) => value
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|e| Error::InvalidConfig(format!("{}: {}", key, e))),
        Err(_) => Ok(None),
    }
}
