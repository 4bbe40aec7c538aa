//! # warren-sandbox
//!
//! Access control for the warren filesystem. [`ProtectedFs`] interposes on
//! every filesystem entry point, consulting [`AccessPolicy`]: a
//! deny-takes-precedence glob check against cached sandbox metadata,
//! followed by an optional caller-supplied [`AccessHook`].
//!
//! Hook re-entrancy: a hook runs while a protected operation is in flight
//! and MUST NOT call back into the same [`ProtectedFs`] instance — that
//! recurses into another policy check and, with a misbehaving hook, never
//! terminates. Hooks that need filesystem access should go through
//! [`ProtectedFs::inner`].

mod error;
pub mod glob;
mod metadata;
mod policy;
mod protected;

pub use error::{SandboxError, SandboxResult};
pub use glob::PathPattern;
pub use metadata::{MetadataStore, SandboxMetadata, METADATA_KEY, METADATA_PREFIX};
pub use policy::{
    AccessDecision, AccessHook, AccessPolicy, DecisionSource, HookRequest, Operation,
    PermissionDenied,
};
pub use protected::{GuardedHandle, ProtectedFs};
