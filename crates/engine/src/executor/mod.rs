//! Action executors, keyed by action `type`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use resact_core::{ActionSpec, EngineError, EngineResult, ObjectSnapshot};

use crate::ports::SecretStore;
use crate::template::{JinjaRenderer, Renderer};

pub mod http;
pub mod retry;
pub mod tls;

pub use http::HttpExecutor;
pub use retry::{RetryPolicy, StatusExpectation};

/// Everything an executor needs for one action run. Headers are already resolved.
#[derive(Debug, Clone, Copy)]
pub struct ActionContext<'a> {
    pub action: &'a ActionSpec,
    /// Namespace of the owning rule; secret references resolve here.
    pub namespace: &'a str,
    pub object: &'a ObjectSnapshot,
    pub headers: &'a BTreeMap<String, String>,
}

#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, ctx: ActionContext<'_>) -> EngineResult<()>;
}

#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn ActionExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self { Self::default() }

    /// Registry with the built-in `http` executor.
    pub fn with_http(secrets: Arc<dyn SecretStore>) -> Self {
        let mut r = Self::new();
        let renderer: Arc<dyn Renderer> = Arc::new(JinjaRenderer::default());
        r.register("http", Arc::new(HttpExecutor::new(secrets, renderer)));
        r
    }

    /// Returns the executor previously registered for `kind`, if any.
    pub fn register(&mut self, kind: impl Into<String>, executor: Arc<dyn ActionExecutor>) -> Option<Arc<dyn ActionExecutor>> {
        self.executors.insert(kind.into(), executor)
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut k: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        k.sort_unstable();
        k
    }

    pub async fn execute(&self, ctx: ActionContext<'_>) -> EngineResult<()> {
        let kind = ctx.action.action_type.as_str();
        let executor = self
            .executors
            .get(kind)
            .ok_or_else(|| EngineError::config(format!("unsupported action type {kind:?}")))?;
        executor.execute(ctx).await
    }
}
