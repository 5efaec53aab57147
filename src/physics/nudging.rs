//! Intensive observation period (IOP) nudging: relax temperature and vapor
//! toward observed profiles within a pressure window.

use num_traits::Float;

/// Pressure window `[p_low, p_high]` (Pa) where nudging applies, and the
/// relaxation time scale (s).
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct NudgingBounds<T> {
    pub p_low: T,
    pub p_high: T,
    pub tscale: T,
}

/// Relax `t` and `q` toward `t_obs`/`q_obs` for one step of length `dt`.
///
/// Writes the relaxation tendencies into `relax_t`/`relax_q` (zero outside
/// the window) and the updated profiles into `t_update`/`q_update`. The
/// effective time scale is never shorter than `dt`.
#[allow(clippy::too_many_arguments)]
pub fn advance_iop_nudging<T: Float>(
    dt: T,
    bounds: &NudgingBounds<T>,
    p_mid: &[T],
    t: &[T],
    q: &[T],
    t_obs: &[T],
    q_obs: &[T],
    t_update: &mut [T],
    q_update: &mut [T],
    relax_t: &mut [T],
    relax_q: &mut [T],
) {
    let rtau = dt.max(bounds.tscale);
    for k in 0..p_mid.len() {
        let inside = p_mid[k] >= bounds.p_low && p_mid[k] <= bounds.p_high;
        let (rt, rq) = if inside {
            (-(t[k] - t_obs[k]) / rtau, -(q[k] - q_obs[k]) / rtau)
        } else {
            (T::zero(), T::zero())
        };
        relax_t[k] = rt;
        relax_q[k] = rq;
        t_update[k] = t[k] + rt * dt;
        q_update[k] = q[k] + rq * dt;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn relaxes_only_inside_the_window() {
        let bounds = NudgingBounds { p_low: 50_000.0, p_high: 90_000.0, tscale: 100.0 };
        let p = [30_000.0, 70_000.0];
        let (t, q) = ([250.0, 280.0], [0.001, 0.01]);
        let (t_obs, q_obs) = ([260.0, 290.0], [0.002, 0.02]);
        let (mut tu, mut qu, mut rt, mut rq) = ([0.0; 2], [0.0; 2], [0.0; 2], [0.0; 2]);
        advance_iop_nudging(50.0, &bounds, &p, &t, &q, &t_obs, &q_obs, &mut tu, &mut qu, &mut rt, &mut rq);
        assert_eq!((tu[0], rt[0]), (250.0, 0.0));
        assert_relative_eq!(rt[1], 0.1);
        assert_relative_eq!(tu[1], 285.0);
        assert_relative_eq!(qu[1], 0.015);

        // dt longer than tscale: land exactly on the observation.
        advance_iop_nudging(400.0, &bounds, &p, &t, &q, &t_obs, &q_obs, &mut tu, &mut qu, &mut rt, &mut rq);
        assert_relative_eq!(tu[1], 290.0);
    }
}
