//! 演示方法

use anyhow::Context;
use duplex_rpc::{arg, MethodResult, Node};
use serde_json::{json, Value};
use std::time::Duration;

/// 注册演示方法
pub async fn register(node: &Node) -> duplex_rpc::Result<()> {
    node.register_local_method("ping", |_| Ok(json!("pong")))
        .await?;
    node.register_local_method("echo", |args| Ok(Value::Array(args)))
        .await?;
    node.register_local_method("multiply", |args| {
        let a: f64 = arg(&args, 0)?;
        let b: f64 = arg(&args, 1)?;
        Ok(number(a * b))
    })
    .await?;
    node.register_local_method("sum", sum).await?;
    node.register_local_async_method("sleep", |args| async move {
        let ms: u64 = arg(&args, 0)?;
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(json!(ms))
    })
    .await?;
    node.register_local_method("fail", |args| {
        let message: String = arg(&args, 0).unwrap_or_else(|_| "An error occurred".to_string());
        Err(anyhow::anyhow!(message))
    })
    .await?;
    Ok(())
}

/// 对所有参数求和
fn sum(args: Vec<Value>) -> MethodResult {
    let mut total = 0.0;
    for (i, value) in args.into_iter().enumerate() {
        let n: f64 = serde_json::from_value(value.clone())
            .with_context(|| format!("invalid argument #{}: {}", i, value))?;
        total += n;
    }
    Ok(number(total))
}

/// 整数结果保持整数形式
fn number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        json!(value as i64)
    } else {
        json!(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duplex_rpc::NodeConfig;

    #[tokio::test]
    async fn test_demo_methods_registered() {
        let node = Node::new(NodeConfig::listen("127.0.0.1", 0)).unwrap();
        register(&node).await.unwrap();
        assert_eq!(
            node.methods().await,
            vec!["echo", "fail", "multiply", "ping", "sleep", "sum"]
        );
    }

    #[test]
    fn test_sum() {
        assert_eq!(sum(vec![]).unwrap(), json!(0));
        assert_eq!(sum(vec![json!(1), json!(2.5), json!(3.5)]).unwrap(), json!(7));
        let err = sum(vec![json!(1), json!("x")]).unwrap_err();
        assert!(err.to_string().starts_with("invalid argument #1"));
    }

    #[test]
    fn test_number_formatting() {
        assert_eq!(number(30.0), json!(30));
        assert_eq!(number(2.5), json!(2.5));
        assert_eq!(number(-4.0), json!(-4));
    }
}
