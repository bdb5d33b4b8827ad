//! 本地方法注册表
//!
//! 同步和异步方法统一包装成 `MethodHandler`，分发器无需区分调用方式。

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::errors::{Error, Result};

/// 方法执行结果，错误文本会原样回传给调用方
pub type MethodResult = anyhow::Result<Value>;

pub type MethodFuture = Pin<Box<dyn Future<Output = MethodResult> + Send>>;

/// 统一的方法处理器类型
pub type MethodHandler = Arc<dyn Fn(Vec<Value>) -> MethodFuture + Send + Sync>;

/// 方法注册表
///
/// 重复注册同名方法会返回 `Error::DuplicateMethod`，不会覆盖已有方法。
#[derive(Clone, Default)]
pub struct MethodRegistry {
    methods: Arc<RwLock<HashMap<String, MethodHandler>>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册同步方法
    pub async fn register<F>(&self, name: impl Into<String>, handler: F) -> Result<()>
    where
        F: Fn(Vec<Value>) -> MethodResult + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        let wrapped: MethodHandler = Arc::new(move |args: Vec<Value>| {
            let handler = handler.clone();
            Box::pin(async move { handler(args) }) as MethodFuture
        });
        self.insert(name.into(), wrapped).await
    }

    /// 注册异步方法
    pub async fn register_async<F, Fut>(&self, name: impl Into<String>, handler: F) -> Result<()>
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MethodResult> + Send + 'static,
    {
        let wrapped: MethodHandler =
            Arc::new(move |args: Vec<Value>| Box::pin(handler(args)) as MethodFuture);
        self.insert(name.into(), wrapped).await
    }

    async fn insert(&self, name: String, handler: MethodHandler) -> Result<()> {
        let mut methods = self.methods.write().await;
        if methods.contains_key(&name) {
            return Err(Error::DuplicateMethod(name));
        }
        debug!("注册方法: {}", name);
        methods.insert(name, handler);
        Ok(())
    }

    /// 查找方法
    pub async fn lookup(&self, name: &str) -> Option<MethodHandler> {
        let methods = self.methods.read().await;
        methods.get(name).cloned()
    }

    /// 获取已注册的方法列表
    pub async fn list_methods(&self) -> Vec<String> {
        let methods = self.methods.read().await;
        let mut names: Vec<String> = methods.keys().cloned().collect();
        names.sort();
        names
    }
}

/// 取出第 `index` 个位置参数并反序列化
pub fn arg<T: DeserializeOwned>(args: &[Value], index: usize) -> anyhow::Result<T> {
    let value = args
        .get(index)
        .with_context(|| format!("missing argument #{} (got {})", index, args.len()))?;
    serde_json::from_value(value.clone())
        .with_context(|| format!("invalid argument #{}: {}", index, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = MethodRegistry::new();
        registry
            .register("multiply", |args| {
                let a: i64 = arg(&args, 0)?;
                let b: i64 = arg(&args, 1)?;
                Ok(json!(a * b))
            })
            .await
            .unwrap();

        let handler = registry.lookup("multiply").await.unwrap();
        let result = handler(vec![json!(5), json!(6)]).await.unwrap();
        assert_eq!(result, json!(30));
        assert!(registry.lookup("divide").await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_rejected() {
        let registry = MethodRegistry::new();
        registry.register("ping", |_| Ok(json!("pong"))).await.unwrap();

        let err = registry
            .register_async("ping", |_| async { Ok(json!("other")) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateMethod(ref name) if name == "ping"));

        // 原方法保持不变
        let handler = registry.lookup("ping").await.unwrap();
        assert_eq!(handler(vec![]).await.unwrap(), json!("pong"));
    }

    #[tokio::test]
    async fn test_list_methods_sorted() {
        let registry = MethodRegistry::new();
        registry.register("zeta", |_| Ok(Value::Null)).await.unwrap();
        registry
            .register_async("alpha", |_| async { Ok(Value::Null) })
            .await
            .unwrap();
        assert_eq!(registry.list_methods().await, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_arg_errors() {
        let args = vec![json!("text")];
        let err = arg::<i64>(&args, 0).unwrap_err();
        assert!(err.to_string().starts_with("invalid argument #0"));

        let err = arg::<i64>(&args, 3).unwrap_err();
        assert_eq!(err.to_string(), "missing argument #3 (got 1)");
    }
}
