//! Physical constants shared by the column physics.

pub const P0: f64 = 100_000.0;
/// Dry-air gas constant, J/(kg K).
pub const RD: f64 = 287.042;
/// Water-vapor gas constant, J/(kg K).
pub const RV: f64 = 461.505;
/// Dry-air heat capacity at constant pressure, J/(kg K).
pub const CP: f64 = 1004.64;
pub const INV_CP: f64 = 1.0 / CP;
pub const GRAVIT: f64 = 9.80616;
pub const EP_2: f64 = RD / RV;
