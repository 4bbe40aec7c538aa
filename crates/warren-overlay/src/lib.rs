//! # warren-overlay
//!
//! Copy-on-write base-layer tooling for the warren filesystem: import a
//! host directory tree under a mount path, detect drift between the live
//! filesystem and the host tree, and export the drift as a reviewable
//! patch.
//!
//! All traversals (host side and filesystem side) use explicit work stacks;
//! deeply nested trees never grow the call stack.

mod changes;
mod error;
mod import;
mod patch;

pub use changes::{changes, ChangeKind, OverlayChange};
pub use error::{OverlayError, OverlayResult};
pub use import::{initialize, reset, ImportSummary, OverlayConfig};
pub use patch::export_patch;
