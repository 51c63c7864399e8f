//! Local method registry — the handlers a codec exposes to its remote peer.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::wire::JsonRpcError;

/// The result a locally-implemented RPC method produces.
pub type MethodResult = Result<Value, JsonRpcError>;

/// A method this codec serves to its remote peer (e.g. `subscribe`, `unsubscribe`
/// on the hub side, or `ping` on an upstream adapter's codec).
#[async_trait]
pub trait LocalMethod: Send + Sync {
    /// Validate and execute. Implementations are expected to do their own
    /// params validation and return `-32602 invalid params` via
    /// [`JsonRpcError`] rather than panicking.
    async fn call(&self, params: Value) -> MethodResult;
}

/// `F: Fn(Value) -> Future<Output = MethodResult>` adapter, for closures.
pub struct FnMethod<F>(pub F);

#[async_trait]
impl<F, Fut> LocalMethod for FnMethod<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = MethodResult> + Send,
{
    async fn call(&self, params: Value) -> MethodResult {
        (self.0)(params).await
    }
}

/// Name → handler map. Looked up once per inbound request.
#[derive(Default)]
pub struct MethodRegistry {
    methods: HashMap<String, Arc<dyn LocalMethod>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, method: Arc<dyn LocalMethod>) {
        self.methods.insert(name.into(), method);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn LocalMethod>> {
        self.methods.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl LocalMethod for Echo {
        async fn call(&self, params: Value) -> MethodResult {
            Ok(params)
        }
    }

    #[tokio::test]
    async fn registry_dispatches_by_name() {
        let mut reg = MethodRegistry::new();
        reg.register("echo", Arc::new(Echo));

        let method = reg.get("echo").expect("registered");
        let result = method.call(serde_json::json!(42)).await.unwrap();
        assert_eq!(result, serde_json::json!(42));

        assert!(reg.get("missing").is_none());
    }
}
