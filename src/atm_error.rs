//! AtmError: Unified error type for atmos-driver public APIs
//!
//! Every fallible operation in the crate (driver stage transitions, field
//! registration, remap setup and execution, communication, configuration)
//! reports failures through this enum. None of these errors are meant to be
//! recovered from inside a run: the embedding application is expected to
//! abort once one surfaces.

use thiserror::Error;

/// Unified error type for atmos-driver operations.
#[derive(Debug, Error)]
pub enum AtmError {
    // ----- sequencing / programmer errors -----
    /// A driver operation ran before its prerequisite stages completed, or
    /// after a stage it must precede.
    #[error("Failed driver status check in `{operation}`: missing stages [{missing}], forbidden stages already set [{forbidden}] (status: {status})")]
    StatusCheckFailed {
        operation: &'static str,
        missing: String,
        forbidden: String,
        status: String,
    },
    /// Operation not supported by this component.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(&'static str),
    /// A registration-phase call happened outside the registration window.
    #[error("Registration phase error in `{operation}`: {reason}")]
    RegistrationPhase {
        operation: &'static str,
        reason: &'static str,
    },
    /// Index out of range for the registered remap fields.
    #[error("Remap field index {index} out of range (registered: {registered})")]
    FieldIndexOutOfRange { index: usize, registered: usize },
    /// Time step must be strictly positive.
    #[error("Input time step must be positive, got {0}")]
    InvalidTimeStep(f64),

    // ----- data errors -----
    /// Source/target layouts cannot be related by a remap.
    #[error("Incompatible remap layouts for `{field}`: source {src}, target {tgt}")]
    IncompatibleLayouts {
        field: String,
        src: String,
        tgt: String,
    },
    /// A layout was malformed for the requested use.
    #[error("Invalid layout: {0}")]
    InvalidLayout(String),
    /// Required inputs could not be found in any initial-condition source.
    #[error("Missing initial conditions for fields: {}", .0.join(", "))]
    MissingInitialConditions(Vec<String>),
    /// Initial condition data present but with the wrong number of values.
    #[error("Initial condition for `{field}` has the wrong dimension: expected {expected}, got {got}")]
    InitialConditionShape {
        field: String,
        expected: usize,
        got: usize,
    },
    /// Field lookup failed.
    #[error("Field `{name}` not found on grid `{grid}`")]
    UnknownField { name: String, grid: String },
    /// Field handle does not belong to this repository.
    #[error("Invalid field handle {0}")]
    InvalidFieldHandle(usize),
    /// Same field registered twice with conflicting identifiers.
    #[error("Field `{name}` on grid `{grid}` re-registered with a different layout")]
    ConflictingField { name: String, grid: String },
    /// Group lookup failed.
    #[error("Field group `{0}` not found")]
    UnknownGroup(String),
    /// Grid lookup failed.
    #[error("Grid `{0}` not found")]
    UnknownGrid(String),
    /// A grid was built with the same GID twice.
    #[error("Duplicate GID {gid} on grid `{grid}`")]
    DuplicateGid { gid: u64, grid: String },
    /// Two descriptions of the same grid disagree.
    #[error("Grid `{grid}` mismatch: {reason}")]
    GridMismatch { grid: String, reason: String },
    /// No remapper can relate the two grids.
    #[error("No remap available from grid `{src}` to grid `{tgt}`")]
    NoRemapAvailable { src: String, tgt: String },
    /// A GID was referenced that the grid does not contain.
    #[error("GID {gid} not present on grid `{grid}`")]
    UnknownGid { gid: u64, grid: String },
    /// Values written to a field did not match its size.
    #[error("Size mismatch for field `{field}`: expected {expected} values, got {got}")]
    FieldSizeMismatch {
        field: String,
        expected: usize,
        got: usize,
    },
    /// A process wrote a field it was only granted read access to.
    #[error("Field `{field}` is read-only in this context")]
    ReadOnlyField { field: String },
    /// A process altered a field outside its granted writable set.
    #[error("Process `{process}` illegally modified field `{field}`")]
    FieldIllegallyModified { process: String, field: String },
    /// A mapping-file row does not satisfy the partition of unity.
    #[error("Map row for target GID {row} sums to {sum}, expected 1")]
    WeightSumMismatch { row: u64, sum: f64 },
    /// Malformed mapping file line.
    #[error("Map file parse error at line {line}: {reason}")]
    MapFileParse { line: usize, reason: String },
    /// Unknown process type in the configuration.
    #[error("Unknown atmosphere process type `{0}`")]
    UnknownProcessType(String),
    /// Invalid process configuration.
    #[error("Invalid parameters for process `{process}`: {reason}")]
    InvalidProcessParams { process: String, reason: String },

    // ----- external-system errors -----
    /// Communication failure with a neighbor.
    #[error("Communication error with neighbor {neighbor}: {source}")]
    CommError {
        neighbor: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// Received buffer length did not match the exchange plan.
    #[error("Buffer size mismatch from neighbor {neighbor}: expected {expected} bytes, got {got}")]
    BufferSizeMismatch {
        neighbor: usize,
        expected: usize,
        got: usize,
    },
    /// The I/O subsystem was initialized with a different communicator.
    #[error("I/O subsystem was initialized with communicator handle {inited:#x}, current atm communicator is {current:#x}")]
    CommMismatch { inited: u64, current: u64 },
    /// Output stream failure.
    #[error("Output stream `{stream}` failed: {reason}")]
    Output { stream: String, reason: String },
    /// Filesystem or stream I/O.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Configuration parse error.
    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),
}

/// Simple string error used as a boxed `source` for [`AtmError::CommError`].
#[derive(Debug, Error)]
#[error("{0}")]
pub struct CommError(pub String);
