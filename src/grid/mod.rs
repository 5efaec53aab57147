//! Distributed unstructured grids and the manager that builds them.
//!
//! A [`Grid`] is the rank-local view of a named set of degrees of freedom:
//! every DOF has a global identifier (GID) and a local index (LID) valid only
//! on this rank. Grids are immutable once built.

pub mod decomposition;
pub mod grids_manager;
pub mod point_grid;

pub use decomposition::{block_owner, block_range};
pub use grids_manager::{GridProvider, GridsManager};
pub use point_grid::{Gid, Grid};
