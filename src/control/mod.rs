//! Process orchestration: the driver, its state machine, and the pieces it
//! coordinates (process tree, initial conditions, output, coupling).

pub mod atm_process;
pub mod atmosphere_driver;
pub mod dag;
pub mod factory;
pub mod field_guard;
pub mod initial_conditions;
pub mod io_subsystem;
pub mod output;
pub mod process_group;
pub mod processes;
pub mod status;
pub mod surface_coupling;

pub use atm_process::{AtmosphereProcess, BoundFields, GroupRequest};
pub use atmosphere_driver::AtmosphereDriver;
pub use dag::AtmProcDag;
pub use factory::{ProcessCreator, ProcessFactory};
pub use field_guard::FieldMutationGuard;
pub use initial_conditions::{IcLookup, IcSource, JsonIcSource, apply_initial_condition};
pub use output::{JsonLinesWriter, MemoryWriter, OutputManager, OutputWriter};
pub use process_group::AtmosphereProcessGroup;
pub use status::{DriverStage, DriverStatus};
pub use surface_coupling::SurfaceCoupling;
