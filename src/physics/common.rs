//! Common thermodynamic conversions.

use crate::physics::constants::{CP, EP_2, GRAVIT, INV_CP, P0, RD};
use num_traits::Float;

#[inline]
pub(crate) fn lit<T: Float>(v: f64) -> T {
    T::from(v).unwrap_or_else(T::nan)
}

/// Exner function `(p / p0)^(Rd / cp)`, dimensionless.
#[inline]
pub fn exner_function<T: Float>(pressure: T) -> T {
    (pressure / lit(P0)).powf(lit(RD * INV_CP))
}

/// Potential temperature from temperature (K) and pressure (Pa).
#[inline]
pub fn calculate_theta_from_t<T: Float>(temperature: T, pressure: T) -> T {
    temperature / exner_function(pressure)
}

#[inline]
pub fn calculate_t_from_theta<T: Float>(theta: T, pressure: T) -> T {
    theta * exner_function(pressure)
}

/// Virtual temperature from temperature (K) and vapor mixing ratio (kg/kg).
#[inline]
pub fn calculate_virtual_temperature<T: Float>(temperature: T, qv: T) -> T {
    let ep_2: T = lit(EP_2);
    temperature * ((qv + ep_2) / (ep_2 * (T::one() + qv)))
}

#[inline]
pub fn calculate_temperature_from_virtual_temperature<T: Float>(t_virtual: T, qv: T) -> T {
    let ep_2: T = lit(EP_2);
    t_virtual * ((ep_2 * (T::one() + qv)) / (qv + ep_2))
}

/// Dry static energy, J/kg.
#[inline]
pub fn calculate_dse<T: Float>(temperature: T, z: T, surf_geopotential: T) -> T {
    lit::<T>(CP) * temperature + lit::<T>(GRAVIT) * z + surf_geopotential
}

/// Layer thickness (m) from pseudo density (Pa), midpoint pressure (Pa),
/// temperature (K) and vapor mixing ratio.
#[inline]
pub fn calculate_dz<T: Float>(pseudo_density: T, p_mid: T, t_mid: T, qv: T) -> T {
    let t_virtual = calculate_virtual_temperature(t_mid, qv);
    lit::<T>(RD / GRAVIT) * pseudo_density * t_virtual / p_mid
}

/// Interface heights of a column, integrating `dz` up from `z_surf`.
///
/// `z_int` has one more entry than `dz`; the last entry is the surface.
pub fn calculate_z_int<T: Float>(dz: &[T], z_surf: T, z_int: &mut [T]) {
    debug_assert_eq!(z_int.len(), dz.len() + 1);
    let nlev = dz.len();
    z_int[nlev] = z_surf;
    for k in (0..nlev).rev() {
        z_int[k] = z_int[k + 1] + dz[k];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn exner_is_one_at_reference_pressure() {
        assert_relative_eq!(exner_function(P0), 1.0);
        assert!(exner_function(50_000.0_f64) < 1.0);
    }

    #[test]
    fn theta_and_t_are_inverse() {
        let (t, p) = (280.0_f64, 70_000.0);
        assert_relative_eq!(calculate_t_from_theta(calculate_theta_from_t(t, p), p), t, max_relative = 1e-12);
        let tv = calculate_virtual_temperature(t, 0.01);
        assert!(tv > t);
        assert_relative_eq!(
            calculate_temperature_from_virtual_temperature(tv, 0.01),
            t,
            max_relative = 1e-12
        );
    }

    #[test]
    fn z_int_accumulates_from_the_surface() {
        let dz = [3.0_f32, 2.0, 1.0];
        let mut z = [0.0_f32; 4];
        calculate_z_int(&dz, 10.0, &mut z);
        assert_eq!(z, [16.0, 13.0, 11.0, 10.0]);
    }

    #[test]
    fn dry_dz_matches_hydrostatics() {
        // Dry air: dz = Rd T dp / (g p)
        let dz = calculate_dz(1000.0_f64, 100_000.0, 300.0, 0.0);
        assert_relative_eq!(dz, RD * 300.0 * 1000.0 / (GRAVIT * 100_000.0), max_relative = 1e-12);
        assert_relative_eq!(calculate_dse(300.0_f64, 0.0, 0.0), CP * 300.0);
    }
}
