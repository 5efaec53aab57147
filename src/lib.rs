#![cfg_attr(docsrs, feature(doc_cfg))]
//! # atmos-driver
//!
//! Core of an atmosphere model driver: a staged initialization state
//! machine that builds a tree of atmosphere processes, the grids and fields
//! they need, and their initial conditions, then advances them in time.
//! Fields move between grids through remappers; the coarsening remapper
//! applies a sparse weight matrix whose rows may be split across ranks and
//! sums the partial results with non-blocking point-to-point messages.
//!
//! ## Features
//! - `mpi-support`: the [`MpiComm`](algs::communicator::MpiComm) backend.
//! - `rayon`: column-parallel loops in the built-in processes.
//!
//! Without MPI, multi-rank runs are simulated in-process with
//! [`LocalComm`](algs::communicator::LocalComm), one thread per rank.
//!
//! ## Usage
//!
//! ```no_run
//! use atmos_driver::prelude::*;
//!
//! # fn main() -> Result<(), AtmError> {
//! let params = AtmParams::from_path("atm.json")?;
//! let mut driver = AtmosphereDriver::<NoComm>::new();
//! driver.initialize(NoComm, params, TimeStamp::new(2000, 1, 1, 0.0))?;
//! for _ in 0..10 {
//!     driver.run(1800.0)?;
//! }
//! driver.finalize()?;
//! # Ok(())
//! # }
//! ```

pub mod algs;
pub mod atm_error;
pub mod config;
pub mod control;
pub mod field;
pub mod grid;
pub mod physics;
pub mod remap;
pub mod time_stamp;

/// The most-used traits and types.
pub mod prelude {
    pub use crate::algs::communicator::{Communicator, LocalComm, NoComm};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::atm_error::AtmError;
    pub use crate::config::AtmParams;
    pub use crate::control::{
        AtmosphereDriver, AtmosphereProcess, DriverStage, DriverStatus, IcSource, ProcessFactory,
        SurfaceCoupling,
    };
    pub use crate::field::{
        FieldAccess, FieldHandle, FieldIdentifier, FieldLayout, FieldRepository, FieldStore, FieldTag,
    };
    pub use crate::grid::{Gid, Grid, GridProvider, GridsManager};
    pub use crate::remap::{CoarseningRemapper, IdentityRemapper, MapFile, Remapper};
    pub use crate::time_stamp::TimeStamp;
}
