//! Header table primitives.
//!
//! # Data Flow
//! ```text
//! directive line "Name: value"
//!     → name.rs (length-prefixed descriptor, case-insensitive match)
//!     → list.rs (unset by descriptor, append raw line)
//!     → fold.rs (merge repeated collect header, bounded by workspace.rs)
//! ```
//!
//! # Design Decisions
//! - Lines are stored raw, exactly as a directive or client sent them
//! - Every line built by the core is charged to the request workspace
//! - A fold that does not fit drops the merge, never half-applies it

pub mod fold;
pub mod list;
pub mod name;
pub mod workspace;

pub use fold::{fold, FoldError, Folded};
pub use list::HeaderList;
pub use name::{HeaderName, HeaderNameError};
pub use workspace::{Workspace, WorkspaceOverflow};

/// The four header collections a transaction exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderTarget {
    /// Client request.
    Request,
    /// Request sent to the origin backend.
    BackendRequest,
    /// Response received from the origin backend.
    BackendResponse,
    /// Response delivered to the client.
    Response,
}
