//! Access policy evaluation.
//!
//! A request is `(operation, path, optional data)`. Evaluation order:
//!
//! 1. Fetch metadata through the cache.
//! 2. Denied globs win over everything; a non-empty allow list must match.
//! 3. With no hook registered the local verdict stands (source `local`).
//! 4. Otherwise the hook gets the final word, enriched with workspace
//!    context.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use warren_store::Result as StoreResult;

use crate::glob::{self, compile_all};
use crate::metadata::{MetadataStore, SandboxMetadata};

/// The closed set of policed operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Read,
    Write,
    Delete,
    Mkdir,
    Readdir,
    Stat,
    Execute,
    Rename,
    Copy,
    Symlink,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Read => "read",
            Operation::Write => "write",
            Operation::Delete => "delete",
            Operation::Mkdir => "mkdir",
            Operation::Readdir => "readdir",
            Operation::Stat => "stat",
            Operation::Execute => "execute",
            Operation::Rename => "rename",
            Operation::Copy => "copy",
            Operation::Symlink => "symlink",
        }
    }

    /// Read-only operations never change filesystem state.
    pub fn is_read_only(self) -> bool {
        matches!(self, Operation::Read | Operation::Readdir | Operation::Stat)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which layer produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionSource {
    /// The glob check (or the no-hook fast path).
    Local,
    /// The registered access hook.
    Callback,
}

impl DecisionSource {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionSource::Local => "local",
            DecisionSource::Callback => "callback",
        }
    }
}

/// The outcome of a policy check.
#[derive(Debug, Clone)]
pub struct AccessDecision {
    pub allowed: bool,
    pub source: DecisionSource,
    pub reason: Option<String>,
}

impl AccessDecision {
    fn allow(source: DecisionSource) -> Self {
        Self {
            allowed: true,
            source,
            reason: None,
        }
    }

    fn deny(source: DecisionSource, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            source,
            reason: Some(reason.into()),
        }
    }
}

/// Context handed to an access hook.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookRequest {
    pub operation: Operation,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workload_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trust_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Caller-supplied access decision.
///
/// Implementations must not invoke the [`crate::ProtectedFs`] that called
/// them; use [`crate::ProtectedFs::inner`] for filesystem access.
#[async_trait]
pub trait AccessHook: Send + Sync {
    async fn check(&self, request: &HookRequest) -> bool;
}

/// Structured EACCES error raised by [`AccessPolicy::check_or_deny`].
#[derive(Debug, Clone, Error)]
#[error("{code}: {operation} '{path}': {reason}")]
pub struct PermissionDenied {
    pub code: &'static str,
    pub operation: Operation,
    pub path: String,
    pub reason: String,
}

impl PermissionDenied {
    pub fn new(operation: Operation, path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            code: "EACCES",
            operation,
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Pattern-based allow/deny evaluation with a pluggable hook.
#[derive(Clone)]
pub struct AccessPolicy {
    metadata: Arc<MetadataStore>,
    hook: Option<Arc<dyn AccessHook>>,
}

impl std::fmt::Debug for AccessPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessPolicy")
            .field("hook", &self.hook.is_some())
            .finish_non_exhaustive()
    }
}

impl AccessPolicy {
    /// Policy with no hook: the glob patterns in the stored metadata are
    /// still enforced, with nothing consulted after them.
    pub fn new(metadata: Arc<MetadataStore>) -> Self {
        Self {
            metadata,
            hook: None,
        }
    }

    pub fn with_hook(metadata: Arc<MetadataStore>, hook: Arc<dyn AccessHook>) -> Self {
        Self {
            metadata,
            hook: Some(hook),
        }
    }

    pub fn metadata(&self) -> &Arc<MetadataStore> {
        &self.metadata
    }

    /// Evaluate a request.
    pub async fn check(
        &self,
        operation: Operation,
        path: &str,
        data: Option<serde_json::Value>,
    ) -> StoreResult<AccessDecision> {
        let meta = self.metadata.get()?;
        if let Some(meta) = &meta {
            if let Some(denial) = check_patterns(meta, path) {
                tracing::debug!(%operation, path, reason = denial.reason.as_deref(), "denied locally");
                return Ok(denial);
            }
        }

        // Local pattern check passed; without a hook that verdict stands.
        let Some(hook) = &self.hook else {
            return Ok(AccessDecision::allow(DecisionSource::Local));
        };

        let request = HookRequest {
            operation,
            path: glob::with_leading_slash(path).into_owned(),
            workspace_id: meta.as_ref().and_then(|m| m.workspace_id.clone()),
            workload_id: meta.as_ref().and_then(|m| m.workload_id.clone()),
            trust_class: meta.as_ref().and_then(|m| m.trust_class.clone()),
            data,
        };
        if hook.check(&request).await {
            Ok(AccessDecision::allow(DecisionSource::Callback))
        } else {
            Ok(AccessDecision::deny(
                DecisionSource::Callback,
                "Denied by access hook",
            ))
        }
    }

    /// Evaluate a request, raising [`PermissionDenied`] on denial.
    pub async fn check_or_deny(
        &self,
        operation: Operation,
        path: &str,
        data: Option<serde_json::Value>,
    ) -> Result<(), crate::SandboxError> {
        let decision = self.check(operation, path, data).await?;
        if decision.allowed {
            Ok(())
        } else {
            let reason = decision.reason.unwrap_or_else(|| "access denied".to_string());
            Err(PermissionDenied::new(operation, glob::with_leading_slash(path).into_owned(), reason).into())
        }
    }
}

/// Deny-takes-precedence pattern check. `None` means the local layer has no
/// objection.
fn check_patterns(meta: &SandboxMetadata, path: &str) -> Option<AccessDecision> {
    for pattern in compile_all(&meta.denied_paths) {
        if pattern.matches(path) {
            return Some(AccessDecision::deny(
                DecisionSource::Local,
                format!("Path matches denied pattern: {}", pattern.pattern()),
            ));
        }
    }
    if !meta.allowed_paths.is_empty() {
        let allowed = compile_all(&meta.allowed_paths);
        if !allowed.iter().any(|pattern| pattern.matches(path)) {
            return Some(AccessDecision::deny(
                DecisionSource::Local,
                "Path does not match any allowed pattern",
            ));
        }
    }
    None
}
