//! Leaf column-physics utilities.
//!
//! Everything here works on one column at a time, level 0 at the model top,
//! and is generic over [`num_traits::Float`].

pub mod common;
pub mod constants;
pub mod nudging;
pub mod shoc;
pub mod transpose;

pub use common::{
    calculate_dse, calculate_dz, calculate_t_from_theta, calculate_temperature_from_virtual_temperature,
    calculate_theta_from_t, calculate_virtual_temperature, calculate_z_int, exner_function,
};
pub use nudging::{NudgingBounds, advance_iop_nudging};
pub use shoc::{ShocGrid, shoc_grid};
pub use transpose::{TransposeDirection, transpose};
