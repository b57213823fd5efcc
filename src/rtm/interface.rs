//! Coupling between two media at a flat boundary.

use std::fmt::Debug;

use nalgebra::DVector;
use num_complex::Complex64;

use super::streams::{MediumStreams, StreamKind};

/// Amplitude reflection coefficients `(r_v, r_h)` for a wave coming from
/// medium 1 with cosine `mu1`.
///
/// Beyond the critical angle the transmitted cosine is imaginary and both
/// coefficients have unit modulus.
pub fn fresnel_coefficients(mu1: f64, eps1: Complex64, eps2: Complex64) -> (Complex64, Complex64) {
    let n = (eps2 / eps1).sqrt();
    let mu2 = (1. - (1. - mu1 * mu1) * eps1 / eps2).sqrt();
    let mu1 = Complex64::from(mu1);

    let rh = (mu1 - n * mu2) / (mu1 + n * mu2);
    let rv = (mu2 - n * mu1) / (mu2 + n * mu1);
    (rv, rh)
}

/// Power reflection and transmission coefficients in the `(V, H, U)` basis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Specular {
    /// Reflection coefficients.
    pub reflection: [f64; 3],
    /// Transmission coefficients.
    pub transmission: [f64; 3],
}

impl Specular {
    /// Coefficients of a lossless specular boundary with amplitude reflection
    /// coefficients `rv` and `rh`.
    pub fn from_amplitudes(rv: Complex64, rh: Complex64) -> Self {
        let (r_v, r_h) = (rv.norm_sqr(), rh.norm_sqr());
        let (t_v, t_h) = (1. - r_v, 1. - r_h);
        Self {
            reflection: [r_v, r_h, (rv * rh.conj()).re],
            transmission: [t_v, t_h, (t_v * t_h).max(0.).sqrt()],
        }
    }
}

/// A boundary between two homogeneous media.
pub trait Interface: Debug + Send + Sync {
    /// Coefficients for a stream of cosine `mu1` coming from medium 1 towards
    /// medium 2.
    fn specular(&self, mu1: f64, eps1: Complex64, eps2: Complex64) -> Specular;
}

/// Perfectly smooth boundary (Fresnel coefficients).
#[derive(Debug, Clone, Copy, Default)]
pub struct Flat;

impl Interface for Flat {
    fn specular(&self, mu1: f64, eps1: Complex64, eps2: Complex64) -> Specular {
        let (rv, rh) = fresnel_coefficients(mu1, eps1, eps2);
        Specular::from_amplitudes(rv, rh)
    }
}

/// Diagonal operators of an interface for one azimuthal mode, indexed by
/// `slot * npol + pol`.
///
/// `t_down` sends the down-welling intensity of slot `i` of the upper medium
/// to slot `i` of the lower medium, and `t_up` the reverse. Slots propagating
/// in only one of the media are totally reflected on their side.
#[derive(Debug, Clone)]
pub(crate) struct InterfaceOperators {
    /// Reflection of the up-welling intensity of the upper medium.
    pub r_top: DVector<f64>,
    /// Reflection of the down-welling intensity of the lower medium.
    pub r_bottom: DVector<f64>,
    pub t_down: DVector<f64>,
    pub t_up: DVector<f64>,
}

impl InterfaceOperators {
    pub(crate) fn new(
        interface: &dyn Interface,
        upper: &MediumStreams,
        lower: &MediumStreams,
        npol: usize,
    ) -> Self {
        let (eps_upper, eps_lower) = (upper.permittivity(), lower.permittivity());
        let common = upper.len().min(lower.len());

        let mut ops = Self {
            r_top: DVector::zeros(upper.len() * npol),
            r_bottom: DVector::zeros(lower.len() * npol),
            t_down: DVector::zeros(common * npol),
            t_up: DVector::zeros(common * npol),
        };

        for slot in 0..upper.len().max(lower.len()) {
            let rows = slot * npol..(slot + 1) * npol;
            if slot < common {
                let specular = interface.specular(upper.mu()[slot], eps_upper, eps_lower);
                // The collimated beam is an intensity per solid angle: account
                // for the change of solid angle across the boundary
                let (down, up) = if upper.kind()[slot] == StreamKind::Collimated {
                    let ratio = (upper.n().powi(2) * upper.mu()[slot])
                        / (lower.n().powi(2) * lower.mu()[slot]);
                    (ratio, ratio.recip())
                } else {
                    (1., 1.)
                };
                for (p, row) in rows.enumerate() {
                    ops.r_top[row] = specular.reflection[p];
                    ops.r_bottom[row] = specular.reflection[p];
                    ops.t_down[row] = specular.transmission[p] * down;
                    ops.t_up[row] = specular.transmission[p] * up;
                }
            } else {
                // Total internal reflection keeps the phase shift between V and H
                let (target, specular) = if slot < upper.len() {
                    (&mut ops.r_top, interface.specular(upper.mu()[slot], eps_upper, eps_lower))
                } else {
                    (&mut ops.r_bottom, interface.specular(lower.mu()[slot], eps_lower, eps_upper))
                };
                for (p, row) in rows.enumerate() {
                    target[row] = if p < 2 { 1. } else { specular.reflection[2] };
                }
            }
        }
        ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DortOptions;
    use crate::rtm::streams::{refractive_index, StreamSet};
    use crate::sensor::SensorMode;
    use approx::assert_abs_diff_eq;

    #[test]
    fn normal_incidence() {
        let eps = Complex64::new(4., 0.);
        let (rv, rh) = fresnel_coefficients(1., Complex64::new(1., 0.), eps);
        // (1 - n) / (1 + n) with n = 2, V and H differ by the sign convention only
        assert_abs_diff_eq!(rh.re, -1. / 3., epsilon = 1e-15);
        assert_abs_diff_eq!(rv.norm_sqr(), rh.norm_sqr(), epsilon = 1e-15);
    }

    #[test]
    fn brewster_angle_cancels_v() {
        let eps = Complex64::new(3., 0.);
        let mu = (1f64 / (1. + 3.)).sqrt();
        let (rv, rh) = fresnel_coefficients(mu, Complex64::new(1., 0.), eps);
        assert_abs_diff_eq!(rv.norm(), 0., epsilon = 1e-12);
        assert!(rh.norm() > 0.1);
    }

    #[test]
    fn total_internal_reflection() {
        let dense = Complex64::new(3.2, 0.);
        let (rv, rh) = fresnel_coefficients(0.3, dense, Complex64::new(1., 0.));
        assert_abs_diff_eq!(rv.norm(), 1., epsilon = 1e-12);
        assert_abs_diff_eq!(rh.norm(), 1., epsilon = 1e-12);
    }

    #[test]
    fn operators_conserve_energy() {
        let dense = Complex64::new(2.2, 0.);
        let air = Complex64::new(1., 0.);
        let options = DortOptions {
            n_max_stream: 6,
            ..Default::default()
        };
        let set =
            StreamSet::new(&options, &[refractive_index(dense)], &[35.], SensorMode::Active).unwrap();
        let upper = set.in_medium(air);
        let lower = set.in_medium(dense);
        let ops = InterfaceOperators::new(&Flat, &upper, &lower, 3);

        assert_eq!(ops.r_top.len(), upper.len() * 3);
        assert_eq!(ops.r_bottom.len(), lower.len() * 3);
        for slot in 0..upper.len() {
            if upper.kind()[slot] == StreamKind::Collimated {
                continue;
            }
            for p in 0..2 {
                let row = slot * 3 + p;
                assert_abs_diff_eq!(ops.r_top[row] + ops.t_down[row], 1., epsilon = 1e-12);
                assert_abs_diff_eq!(ops.t_down[row], ops.t_up[row], epsilon = 1e-15);
            }
        }
        // Streams trapped in the dense medium are totally reflected
        for slot in upper.len()..lower.len() {
            assert_eq!(ops.r_bottom[slot * 3], 1.);
            assert_eq!(ops.r_bottom[slot * 3 + 1], 1.);
        }
    }
}
