//! Built-in atmosphere processes.

pub mod coarsen;
pub mod column_diagnostics;
pub mod iop_nudging;

pub use coarsen::Coarsen;
pub use column_diagnostics::ColumnDiagnostics;
pub use iop_nudging::IopNudging;
