//! Remapping fields between grids.
//!
//! [`Remapper`] is the common interface; [`IdentityRemapper`] handles
//! same-grid requests and [`CoarseningRemapper`] applies a sparse weight
//! matrix from a [`MapFile`] across ranks through an [`ExchangePlan`].

pub mod coarsening;
pub mod exchange_plan;
pub mod identity;
pub mod map_file;
pub mod remapper;

pub use coarsening::CoarseningRemapper;
pub use exchange_plan::{ExchangePlan, PeerWindow};
pub use identity::IdentityRemapper;
pub use map_file::{MapFile, Triplet};
pub use remapper::{Remapper, RemapperBase, layouts_compatible};
