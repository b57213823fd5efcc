//! Azimuthal Fourier decomposition of a layer's phase matrix on the streams.
//!
//! For mode `m`, V and H couple through the cosine part and U through the
//! sine part. The U component is carried with a `√2` scaling that keeps the
//! discrete operator symmetric for reciprocal media.

use std::f64::consts::{PI, SQRT_2};

use nalgebra::{DMatrix, Matrix3};
use smallvec::SmallVec;

use super::streams::{MediumStreams, StreamKind};
use crate::emmodel::LayerOptics;

const NORMALIZATION_ITERATIONS: usize = 200;
const NORMALIZATION_TOLERANCE: f64 = 1e-13;

/// Number of Stokes components used by mode `m`.
pub(crate) fn npol(m: usize) -> usize {
    if m == 0 {
        2
    } else {
        3
    }
}

/// Fourier coefficients `m = 0..=m_max` of the phase matrix from `mu_i` into
/// `mu_s`, integrated over azimuth (no `1/2π` factor).
pub(crate) fn azimuthal_modes(
    optics: &dyn LayerOptics,
    mu_s: f64,
    mu_i: f64,
    m_max: usize,
    n_azimuth: usize,
) -> SmallVec<[Matrix3<f64>; 4]> {
    let step = 2. * PI / n_azimuth as f64;
    let mut modes: SmallVec<[Matrix3<f64>; 4]> = SmallVec::from_elem(Matrix3::zeros(), m_max + 1);

    for k in 0..n_azimuth {
        let dphi = step * k as f64;
        let phase = optics.phase(mu_s, mu_i, dphi) * step;
        for (m, mode) in modes.iter_mut().enumerate() {
            let (sin, cos) = (m as f64 * dphi).sin_cos();
            for p in 0..3 {
                for q in 0..3 {
                    mode[(p, q)] += phase[(p, q)]
                        * match (p, q) {
                            (2, 2) => cos,
                            (_, 2) => -sin * SQRT_2,
                            (2, _) => sin / SQRT_2,
                            _ => cos,
                        };
                }
            }
        }
    }
    modes
}

/// Discrete phase operators of one layer, for every azimuthal mode.
///
/// `pa(m)` couples streams travelling in the same vertical direction, `pb(m)`
/// streams travelling in opposite directions (with the sign flip of U under
/// reflection through the horizontal plane folded in). Rows of collimated
/// streams are zero: the beam does not receive scattered radiation.
#[derive(Debug, Clone)]
pub(crate) struct PhaseOperator {
    pa: Vec<DMatrix<f64>>,
    pb: Vec<DMatrix<f64>>,
}

impl PhaseOperator {
    pub(crate) fn new(
        optics: &dyn LayerOptics,
        streams: &MediumStreams,
        m_max: usize,
        n_azimuth: usize,
        normalize: bool,
    ) -> Self {
        let n = streams.len();
        let mut pa: Vec<_> = (0..=m_max).map(|m| DMatrix::zeros(n * npol(m), n * npol(m))).collect();
        let mut pb = pa.clone();

        if optics.ks() == 0. {
            return Self { pa, pb };
        }

        let mu = streams.mu();
        let kind = streams.kind();
        for i in (0..n).filter(|&i| kind[i] != StreamKind::Collimated) {
            // Observation streams weigh nothing in the integrals
            for j in (0..n).filter(|&j| kind[j] != StreamKind::Observation) {
                let same = azimuthal_modes(optics, mu[i], mu[j], m_max, n_azimuth);
                let opposite = azimuthal_modes(optics, mu[i], -mu[j], m_max, n_azimuth);
                for m in 0..=m_max {
                    let np = npol(m);
                    for p in 0..np {
                        for q in 0..np {
                            let flip = if q == 2 { -1. } else { 1. };
                            pa[m][(i * np + p, j * np + q)] = same[m][(p, q)];
                            pb[m][(i * np + p, j * np + q)] = opposite[m][(p, q)] * flip;
                        }
                    }
                }
            }
        }

        let mut operator = Self { pa, pb };
        if normalize {
            let factor = operator.normalization(optics.ks(), streams);
            // U takes the geometric mean of the V and H factors
            let component = |m: usize, r: usize| {
                let (slot, p) = (r / npol(m), r % npol(m));
                match p {
                    2 => (factor[slot * 2] * factor[slot * 2 + 1]).sqrt(),
                    _ => factor[slot * 2 + p],
                }
            };
            for (m, (pa, pb)) in operator.pa.iter_mut().zip(&mut operator.pb).enumerate() {
                for r in 0..n * npol(m) {
                    for c in 0..n * npol(m) {
                        let scale = component(m, r) * component(m, c);
                        pa[(r, c)] *= scale;
                        pb[(r, c)] *= scale;
                    }
                }
            }
        }
        operator
    }

    /// Factors `f` of the V and H components of every stream such that the
    /// operator `f_a P_ab f_b` of mode 0 scatters `ks` out of every incident
    /// component.
    ///
    /// The factors of the quadrature components are found by a symmetric
    /// Sinkhorn iteration. Observation rows and collimated columns are then
    /// scaled on their own, since they do not enter the quadrature.
    fn normalization(&self, ks: f64, streams: &MediumStreams) -> Vec<f64> {
        let (pa, pb) = (&self.pa[0], &self.pb[0]);
        let w = streams.weight();
        let mut factor = vec![1.; 2 * streams.len()];
        if !(ks > 0.) {
            return factor;
        }
        let components: Vec<usize> = streams
            .quadrature_slots()
            .flat_map(|slot| [slot * 2, slot * 2 + 1])
            .collect();

        // Power scattered out of component b, or into component b when `into`
        let scattered = |factor: &[f64], b: usize, into: bool| -> f64 {
            components
                .iter()
                .map(|&a| {
                    let (r, c) = if into { (b, a) } else { (a, b) };
                    w[a / 2] * factor[a] * (pa[(r, c)] + pb[(r, c)])
                })
                .sum()
        };

        for _ in 0..NORMALIZATION_ITERATIONS {
            let mut change = 0f64;
            for &b in &components {
                let out = factor[b] * scattered(&factor, b, false);
                if out > 0. {
                    let next = factor[b] * (ks / out).sqrt();
                    change = change.max((next / factor[b] - 1.).abs());
                    factor[b] = next;
                }
            }
            if change < NORMALIZATION_TOLERANCE {
                break;
            }
        }

        for (slot, kind) in streams.kind().iter().enumerate() {
            for b in [slot * 2, slot * 2 + 1] {
                let out = match kind {
                    StreamKind::Quadrature => continue,
                    StreamKind::Observation => scattered(&factor, b, true),
                    StreamKind::Collimated => scattered(&factor, b, false),
                };
                if out > 0. {
                    factor[b] = ks / out;
                }
            }
        }
        factor
    }

    pub(crate) fn pa(&self, m: usize) -> &DMatrix<f64> {
        &self.pa[m]
    }

    pub(crate) fn pb(&self, m: usize) -> &DMatrix<f64> {
        &self.pb[m]
    }
}
