//! Explicit Landau-Lifshitz-Gilbert integrator.
//!
//! Only the Zeeman term is modelled: every cell precesses around the uniform
//! applied field and relaxes towards it at a rate set by `alpha`.

use glam::DVec3;

/// Gyromagnetic ratio of the electron in rad/(T s).
pub const GAMMA0: f64 = 1.7595e11;

/// Right-hand side of the LLG equation for a unit vector `m` in field `b`.
pub fn torque(m: DVec3, b: DVec3, alpha: f64) -> DVec3 {
    let precession = m.cross(b);
    let damping = m.cross(precession);
    -GAMMA0 / (1.0 + alpha * alpha) * (precession + alpha * damping)
}

/// One Heun step over every cell; vectors are renormalised afterwards.
pub fn heun_step(m: &mut [DVec3], b: DVec3, alpha: f64, dt: f64) {
    for cell in m.iter_mut() {
        if *cell == DVec3::ZERO {
            continue;
        }
        let k1 = torque(*cell, b, alpha);
        let predicted = (*cell + k1 * dt).normalize_or_zero();
        let k2 = torque(predicted, b, alpha);
        *cell = (*cell + (k1 + k2) * (dt / 2.0)).normalize_or_zero();
    }
}

pub fn average(m: &[DVec3]) -> DVec3 {
    if m.is_empty() {
        return DVec3::ZERO;
    }
    m.iter().copied().sum::<DVec3>() / m.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligned_magnetisation_feels_no_torque() {
        assert_eq!(torque(DVec3::Z, DVec3::Z * 0.1, 0.5), DVec3::ZERO);
    }

    #[test]
    fn damping_relaxes_towards_the_field() {
        let mut m = vec![DVec3::new(1.0, 0.0, 0.1).normalize(); 4];
        let b = DVec3::new(0.0, 0.0, 0.1);
        for _ in 0..20_000 {
            heun_step(&mut m, b, 0.5, 1e-13);
        }
        let avg = average(&m);
        assert!(avg.z > 0.99, "{avg:?}");
        assert!((avg.length() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn empty_cells_stay_empty() {
        let mut m = vec![DVec3::ZERO, DVec3::X];
        heun_step(&mut m, DVec3::Z, 0.1, 1e-13);
        assert_eq!(m[0], DVec3::ZERO);
    }
}
