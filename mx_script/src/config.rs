//! Magnetisation configurations.
//!
//! A [`Config`] maps a position (metres, mesh-centred) to a magnetisation
//! direction. Base shapes capture their parameters at construction time;
//! combinators wrap an existing configuration in a new one and never touch the
//! wrapped value, so a `Config` can be shared freely across threads and
//! statements. Evaluation is deterministic: [`Noisy`] derives its perturbation
//! from a per-instance seed and the sampled position.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use glam::DVec3;

/// A field configuration: position in, vector out.
pub trait FieldConfig: fmt::Debug + Send + Sync {
    fn eval(&self, position: DVec3) -> DVec3;
}

/// Shared handle to a [`FieldConfig`] variant.
#[derive(Clone)]
pub struct Config(Arc<dyn FieldConfig>);

impl Config {
    pub fn new(config: impl FieldConfig + 'static) -> Self {
        Config(Arc::new(config))
    }

    pub fn eval(&self, position: DVec3) -> DVec3 {
        self.0.eval(position)
    }

    pub fn eval_xyz(&self, x: f64, y: f64, z: f64) -> DVec3 {
        self.eval(DVec3::new(x, y, z))
    }

    /// Copy shifted by `offset`, e.g. a vortex centred at x = 100 nm.
    pub fn translate(&self, offset: DVec3) -> Config {
        Config::new(Translated {
            inner: self.clone(),
            offset,
        })
    }

    pub fn scale(&self, factors: DVec3) -> Config {
        Config::new(Scaled {
            inner: self.clone(),
            factors,
        })
    }

    /// Rotates the configuration over `theta` radians around the z-axis.
    pub fn rotate_z(&self, theta: f64) -> Config {
        Config::new(RotatedZ {
            inner: self.clone(),
            cos: theta.cos(),
            sin: theta.sin(),
        })
    }

    pub fn add_noise(&self, amplitude: f64) -> Config {
        static NEXT_SEED: AtomicU64 = AtomicU64::new(0x5EED);
        let seed = splitmix64_mix(NEXT_SEED.fetch_add(1, Ordering::Relaxed));
        Config::new(Noisy {
            inner: self.clone(),
            amplitude,
            seed,
        })
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Uniform {
    pub m: DVec3,
}

impl Uniform {
    pub fn new(mx: f64, my: f64, mz: f64) -> Self {
        Self {
            m: DVec3::new(mx, my, mz),
        }
    }
}

impl FieldConfig for Uniform {
    fn eval(&self, _position: DVec3) -> DVec3 {
        self.m
    }
}

/// In-plane vortex with circulation `circ` and core polarisation `pol`
/// (each +1 or -1). The core is smoothed over two cells so it relaxes easily.
#[derive(Debug, Clone, Copy)]
pub struct Vortex {
    circ: f64,
    pol: f64,
    core_diameter2: f64,
}

impl Vortex {
    pub fn new(circ: i64, pol: i64, cell_x: f64) -> Self {
        Self {
            circ: circ as f64,
            pol: pol as f64,
            core_diameter2: 2.0 * cell_x * cell_x,
        }
    }
}

impl FieldConfig for Vortex {
    fn eval(&self, p: DVec3) -> DVec3 {
        let r2 = p.x * p.x + p.y * p.y;
        let r = r2.sqrt();
        let mz = 1.5 * self.pol * (-r2 / self.core_diameter2).exp();
        if r == 0.0 {
            return DVec3::new(0.0, 0.0, mz);
        }
        DVec3::new(-p.y * self.circ / r, p.x * self.circ / r, mz)
    }
}

/// Two domains (left of x = 0 and right of it) joined by a smoothed wall.
#[derive(Debug, Clone, Copy)]
pub struct TwoDomain {
    left: DVec3,
    wall: DVec3,
    right: DVec3,
    wall_width: f64,
}

impl TwoDomain {
    pub fn new(left: DVec3, wall: DVec3, right: DVec3, cell_x: f64) -> Self {
        Self {
            left,
            wall,
            right,
            wall_width: 2.0 * cell_x,
        }
    }
}

impl FieldConfig for TwoDomain {
    fn eval(&self, p: DVec3) -> DVec3 {
        let domain = if p.x < 0.0 { self.left } else { self.right };
        let ratio = p.x / self.wall_width;
        let gauss = (-(ratio * ratio)).exp();
        domain * (1.0 - gauss) + self.wall * gauss
    }
}

/// Vortex wall: uniform `mleft`/`mright` along x outside a band as wide as
/// the world is tall, a vortex inside it.
#[derive(Debug, Clone, Copy)]
pub struct VortexWall {
    left: f64,
    right: f64,
    half_width: f64,
    vortex: Vortex,
}

impl VortexWall {
    pub fn new(left: f64, right: f64, circ: i64, pol: i64, cell_x: f64, world_y: f64) -> Self {
        Self {
            left,
            right,
            half_width: world_y / 2.0,
            vortex: Vortex::new(circ, pol, cell_x),
        }
    }
}

impl FieldConfig for VortexWall {
    fn eval(&self, p: DVec3) -> DVec3 {
        if p.x < -self.half_width {
            return DVec3::new(self.left, 0.0, 0.0);
        }
        if p.x > self.half_width {
            return DVec3::new(self.right, 0.0, 0.0);
        }
        self.vortex.eval(p)
    }
}

#[derive(Debug, Clone)]
pub struct Translated {
    inner: Config,
    offset: DVec3,
}

impl FieldConfig for Translated {
    fn eval(&self, p: DVec3) -> DVec3 {
        self.inner.eval(p - self.offset)
    }
}

#[derive(Debug, Clone)]
pub struct Scaled {
    inner: Config,
    factors: DVec3,
}

impl FieldConfig for Scaled {
    fn eval(&self, p: DVec3) -> DVec3 {
        self.inner.eval(p / self.factors)
    }
}

#[derive(Debug, Clone)]
pub struct RotatedZ {
    inner: Config,
    cos: f64,
    sin: f64,
}

impl FieldConfig for RotatedZ {
    fn eval(&self, p: DVec3) -> DVec3 {
        let x = p.x * self.cos + p.y * self.sin;
        let y = -p.x * self.sin + p.y * self.cos;
        let m = self.inner.eval(DVec3::new(x, y, p.z));
        DVec3::new(
            m.x * self.cos - m.y * self.sin,
            m.x * self.sin + m.y * self.cos,
            m.z,
        )
    }
}

/// Adds a uniformly distributed perturbation in `[-amplitude/2, amplitude/2)`
/// to every component. The same position always gets the same perturbation.
#[derive(Debug, Clone)]
pub struct Noisy {
    inner: Config,
    amplitude: f64,
    seed: u64,
}

impl FieldConfig for Noisy {
    fn eval(&self, p: DVec3) -> DVec3 {
        let m = self.inner.eval(p);
        let mut state = splitmix64_mix(self.seed ^ p.x.to_bits());
        state = splitmix64_mix(state ^ p.y.to_bits());
        state = splitmix64_mix(state ^ p.z.to_bits());
        let mut next = || {
            state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
            unit_interval(splitmix64_mix(state)) - 0.5
        };
        let noise = DVec3::new(next(), next(), next());
        m + noise * self.amplitude
    }
}

const fn splitmix64_mix(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Upper 53 bits as a float in `[0, 1)`.
fn unit_interval(x: u64) -> f64 {
    (x >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CELL: f64 = 4e-9;

    fn assert_close(a: DVec3, b: DVec3) {
        assert!(
            (a - b).length() <= 1e-12 * (1.0 + b.length()),
            "{a:?} != {b:?}"
        );
    }

    fn sample_points() -> Vec<DVec3> {
        vec![
            DVec3::new(1e-8, -3e-8, 0.0),
            DVec3::new(-2.5e-8, 7e-9, 1e-9),
            DVec3::new(4e-8, 4e-8, -2e-9),
            DVec3::new(-1e-9, 0.0, 0.0),
        ]
    }

    #[test]
    fn translate_samples_the_original_at_shifted_position() {
        let base = Config::new(Vortex::new(1, -1, CELL));
        let offsets = [
            DVec3::new(1e-7, 0.0, 0.0),
            DVec3::new(-3e-8, 2e-8, 5e-9),
            DVec3::ZERO,
        ];
        for offset in offsets {
            let moved = base.translate(offset);
            for p in sample_points() {
                assert_close(moved.eval(p), base.eval(p - offset));
            }
        }
    }

    #[test]
    fn scale_divides_the_sample_position() {
        let base = Config::new(TwoDomain::new(
            DVec3::X,
            DVec3::Y,
            -DVec3::X,
            CELL,
        ));
        let factors = DVec3::new(2.0, 0.5, 3.0);
        let scaled = base.scale(factors);
        for p in sample_points() {
            assert_close(scaled.eval(p), base.eval(p / factors));
        }
    }

    #[test]
    fn combinators_leave_the_wrapped_config_untouched() {
        let base = Config::new(Uniform::new(1.0, 0.0, 0.0));
        let before = base.eval_xyz(1e-9, 2e-9, 0.0);
        let _rotated = base.rotate_z(std::f64::consts::FRAC_PI_2);
        let _noisy = base.add_noise(0.3);
        assert_close(base.eval_xyz(1e-9, 2e-9, 0.0), before);
    }

    #[test]
    fn rotate_z_turns_vectors_and_positions() {
        let base = Config::new(Uniform::new(1.0, 0.0, 0.0));
        let rotated = base.rotate_z(std::f64::consts::FRAC_PI_2);
        assert_close(rotated.eval_xyz(3e-9, 0.0, 0.0), DVec3::new(0.0, 1.0, 0.0));

        let wall = Config::new(TwoDomain::new(DVec3::Z, DVec3::X, -DVec3::Z, CELL));
        let turned = wall.rotate_z(std::f64::consts::FRAC_PI_2);
        // The left domain (x < 0) ends up below y = 0 after a quarter turn.
        let m = turned.eval_xyz(0.0, -1e-7, 0.0);
        assert!((m.z - 1.0).abs() < 1e-9, "{m:?}");
    }

    #[test]
    fn vortex_circulates_and_keeps_a_finite_core() {
        let vortex = Config::new(Vortex::new(1, 1, CELL));
        let east = vortex.eval_xyz(1e-7, 0.0, 0.0);
        assert!(east.y > 0.99 && east.x.abs() < 1e-12);
        let core = vortex.eval_xyz(0.0, 0.0, 0.0);
        assert!(core.is_finite());
        assert!((core.z - 1.5).abs() < 1e-12);
    }

    #[test]
    fn vortex_wall_switches_on_world_height() {
        let wall = Config::new(VortexWall::new(1.0, -1.0, 1, 1, CELL, 1e-7));
        assert_close(wall.eval_xyz(-6e-8, 0.0, 0.0), DVec3::new(1.0, 0.0, 0.0));
        assert_close(wall.eval_xyz(6e-8, 0.0, 0.0), DVec3::new(-1.0, 0.0, 0.0));
        let inside = wall.eval_xyz(1e-8, 0.0, 0.0);
        assert!(inside.y > 0.9);
    }

    #[test]
    fn noise_stays_within_amplitude_and_is_repeatable() {
        let noisy = Config::new(Uniform::new(0.0, 0.0, 1.0)).add_noise(0.2);
        let mut distinct = 0;
        for i in 0..256 {
            let p = DVec3::new(i as f64 * CELL, -(i as f64) * CELL, 0.0);
            let m = noisy.eval(p);
            let delta = m - DVec3::new(0.0, 0.0, 1.0);
            assert!(delta.abs().max_element() <= 0.1 + 1e-12, "{delta:?}");
            assert_eq!(noisy.eval(p), m);
            if delta.length() > 1e-6 {
                distinct += 1;
            }
        }
        assert!(distinct > 200, "{distinct}");
    }
}
