//! Fields: layouts, identifiers, headers, and the arena-backed repository.
//!
//! A field is a named multi-dimensional array of `f64` bound to one grid.
//! The [`FieldRepository`] owns all storage; callers hold [`FieldHandle`]s.
//! Bundled groups and vector components are *subviews*: records that store
//! the handle of their parent plus the sliced dimension and index.

pub mod access;
pub mod header;
pub mod identifier;
pub mod layout;
pub mod repository;

pub use access::{FieldAccess, FieldStore};
pub use header::{FieldHeader, FieldTracking, SubviewInfo};
pub use identifier::FieldIdentifier;
pub use layout::{FieldLayout, FieldTag, LayoutType, get_layout_type};
pub use repository::{FieldHandle, FieldRepository, GroupInfo, RepoState};
