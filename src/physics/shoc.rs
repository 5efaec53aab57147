//! SHOC vertical grid quantities.

use crate::physics::common::lit;
use crate::physics::constants::GRAVIT;
use num_traits::Float;

/// Layer thicknesses and density for one column.
#[derive(Clone, Debug, PartialEq)]
pub struct ShocGrid<T> {
    /// Thickness of each midpoint layer, `nlev` entries.
    pub dz_zt: Vec<T>,
    /// Distance between adjacent midpoints, `nlev + 1` entries.
    pub dz_zi: Vec<T>,
    pub rho_zt: Vec<T>,
}

/// Compute the SHOC grid from midpoint heights `zt_grid` (`nlev`), interface
/// heights `zi_grid` (`nlev + 1`) and pressure thickness `pdel` (`nlev`).
///
/// The top interface thickness is zero; the bottom one is the height of the
/// lowest midpoint above the surface interface.
pub fn shoc_grid<T: Float>(zt_grid: &[T], zi_grid: &[T], pdel: &[T]) -> ShocGrid<T> {
    let nlev = zt_grid.len();
    debug_assert_eq!(zi_grid.len(), nlev + 1);
    debug_assert_eq!(pdel.len(), nlev);

    let dz_zt: Vec<T> = (0..nlev).map(|k| zi_grid[k] - zi_grid[k + 1]).collect();
    let mut dz_zi = vec![T::zero(); nlev + 1];
    for k in 1..nlev {
        dz_zi[k] = zt_grid[k - 1] - zt_grid[k];
    }
    if nlev > 0 {
        dz_zi[nlev] = zt_grid[nlev - 1] - zi_grid[nlev];
    }
    let inv_g = T::one() / lit::<T>(GRAVIT);
    let rho_zt = pdel
        .iter()
        .zip(&dz_zt)
        .map(|(&dp, &dz)| inv_g * dp / dz)
        .collect();
    ShocGrid { dz_zt, dz_zi, rho_zt }
}
