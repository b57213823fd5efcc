//! Modal solution of the transfer equation inside one homogeneous layer, for
//! one azimuthal mode.
//!
//! Components are indexed by `slot * npol + pol`. A layer with `M` components
//! has `2M` modes: `M` decaying downward from the top of the layer, followed
//! by `M` decaying upward from its bottom. At depth `ζ` below the top, a down
//! mode contributes `exp(-λζ) (g + hζ)` and an up mode
//! `exp(-λ(d - ζ)) (g + h(ζ - d))`. The secular part `h` is non-zero for an
//! observation stream resonant with a collimated beam, and for the pair of
//! modes with `λ = 0` of a lossless layer.

use log::trace;
use nalgebra::{Cholesky, DMatrix, DVector, SymmetricEigen};

use super::phase::{npol, PhaseOperator};
use super::streams::{MediumStreams, StreamKind};
use crate::config::DortOptions;
use crate::emmodel::LayerOptics;
use crate::error::{RtmError, RtmResult};

/// Below this relative denominator, an observation stream is treated as
/// resonant with a mode.
const RESONANCE: f64 = 1e-8;

/// Eigenvalues `λ²` below this fraction of the largest one belong to a
/// conservative (lossless) mode.
const CONSERVATIVE: f64 = 1e-10;

/// Up- and down-welling intensities of every mode at one depth (`M × 2M`).
#[derive(Debug, Clone)]
pub(crate) struct Boundary {
    pub up: DMatrix<f64>,
    pub down: DMatrix<f64>,
}

#[derive(Debug, Clone)]
pub(crate) struct LayerModes {
    thickness: f64,
    dim: usize,
    /// Decay rate `λ ≥ 0` of every mode
    rate: DVector<f64>,
    up: DMatrix<f64>,
    down: DMatrix<f64>,
    up_secular: DMatrix<f64>,
    down_secular: DMatrix<f64>,
    /// Constant solution of the thermal problem, identical in both directions
    particular: DVector<f64>,
}

impl LayerModes {
    /// Solve the homogeneous problem of layer `index` for mode `m`. With a
    /// `temperature`, also add the particular solution of thermal emission.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        index: usize,
        optics: &dyn LayerOptics,
        phase: &PhaseOperator,
        streams: &MediumStreams,
        m: usize,
        thickness: f64,
        temperature: Option<f64>,
        options: &DortOptions,
    ) -> RtmResult<Self> {
        let np = npol(m);
        let dim = streams.len() * np;
        let ke = optics.ke();
        if !(ke > 0. || thickness.is_finite()) {
            return Err(RtmError::instability(
                index,
                "a transparent layer cannot be infinitely thick",
            ));
        }

        let mut modes = Self {
            thickness,
            dim,
            rate: DVector::zeros(2 * dim),
            up: DMatrix::zeros(dim, 2 * dim),
            down: DMatrix::zeros(dim, 2 * dim),
            up_secular: DMatrix::zeros(dim, 2 * dim),
            down_secular: DMatrix::zeros(dim, 2 * dim),
            particular: DVector::zeros(dim),
        };

        if optics.ks() == 0. {
            // Without scattering, every component decays on its own
            for (slot, &mu) in streams.mu().iter().enumerate() {
                for p in 0..np {
                    let row = slot * np + p;
                    modes.own_modes(row, row, ke / mu);
                }
            }
        } else {
            modes.scattering_modes(index, ke, phase, streams, m, options)?;
        }

        if let (Some(temperature), 0) = (temperature, m) {
            for slot in (0..streams.len()).filter(|&s| streams.kind()[s] != StreamKind::Collimated) {
                for p in 0..2 {
                    modes.particular[slot * np + p] = temperature;
                }
            }
        }
        Ok(modes)
    }

    /// Unit modes of component `row`, stored in columns `col` and `dim + col`.
    fn own_modes(&mut self, row: usize, col: usize, rate: f64) {
        self.down[(row, col)] = 1.;
        self.up[(row, self.dim + col)] = 1.;
        self.rate[col] = rate;
        self.rate[self.dim + col] = rate;
    }

    fn scattering_modes(
        &mut self,
        index: usize,
        ke: f64,
        phase: &PhaseOperator,
        streams: &MediumStreams,
        m: usize,
        options: &DortOptions,
    ) -> RtmResult<()> {
        let np = npol(m);
        let dim = self.dim;
        let (pa, pb) = (phase.pa(m), phase.pb(m));
        let (mu, weight, kind) = (streams.mu(), streams.weight(), streams.kind());

        let diffuse: Vec<usize> = streams
            .quadrature_slots()
            .flat_map(|slot| (0..np).map(move |p| slot * np + p))
            .collect();
        let nd = diffuse.len();
        if nd == 0 {
            return Err(RtmError::instability(
                index,
                "no quadrature stream propagates in the layer",
            ));
        }
        let mu_d = DVector::from_iterator(nd, diffuse.iter().map(|&r| mu[r / np]));
        let w_d = DVector::from_iterator(nd, diffuse.iter().map(|&r| weight[r / np]));
        let pa_d = DMatrix::from_fn(nd, nd, |a, b| pa[(diffuse[a], diffuse[b])]);
        let pb_d = DMatrix::from_fn(nd, nd, |a, b| pb[(diffuse[a], diffuse[b])]);

        // Symmetric forms of the sum and difference operators
        let scale = mu_d.zip_map(&w_d, |mu, w| (w / mu).sqrt());
        let transport = |sign: f64| -> RtmResult<DMatrix<f64>> {
            let y = DMatrix::from_fn(nd, nd, |a, b| {
                let extinction = if a == b { ke / mu_d[a] } else { 0. };
                extinction - scale[a] * (pa_d[(a, b)] + sign * pb_d[(a, b)]) * scale[b]
            });
            let asymmetry = (&y - y.transpose()).amax() / y.amax();
            if asymmetry > options.reciprocity_tolerance {
                return Err(RtmError::instability(
                    index,
                    format!("phase operator is not reciprocal (relative asymmetry {asymmetry:.2e})"),
                ));
            }
            Ok((&y + y.transpose()) * 0.5)
        };
        let sum = transport(1.)?;
        let difference = transport(-1.)?;

        let cholesky = Cholesky::new(difference)
            .ok_or_else(|| RtmError::instability(index, "scattering exceeds extinction"))?;
        let lower = cholesky.l();
        let reduced = lower.tr_mul(&(&sum * &lower));
        let reduced = (&reduced + reduced.transpose()) * 0.5;
        let eigen = SymmetricEigen::try_new(reduced, f64::EPSILON, options.max_eigen_iterations)
            .ok_or_else(|| RtmError::instability(index, "eigen-solver did not converge"))?;

        let norm = mu_d.zip_map(&w_d, |mu, w| (mu * w).sqrt());
        let threshold = CONSERVATIVE * eigen.eigenvalues.amax();
        for k in 0..nd {
            let lambda2 = eigen.eigenvalues[k];
            if !(lambda2.is_finite() && lambda2 >= -threshold) {
                return Err(RtmError::instability(
                    index,
                    format!("negative eigenvalue {lambda2:.3e}"),
                ));
            }
            if lambda2 <= threshold {
                let s = &lower * eigen.eigenvectors.column(k);
                self.conservative_modes(k, &diffuse, &cholesky.solve(&s), &s, &norm);
                continue;
            }
            let lambda = lambda2.sqrt();
            let s = &lower * eigen.eigenvectors.column(k);
            let d = (&sum * &s) / lambda;
            let s = s.component_div(&norm);
            let d = d.component_div(&norm);
            let plus = (&s + &d) * 0.5;
            let minus = (&s - &d) * 0.5;
            let largest = plus.amax().max(minus.amax());

            for (a, &row) in diffuse.iter().enumerate() {
                self.up[(row, k)] = minus[a] / largest;
                self.down[(row, k)] = plus[a] / largest;
                self.up[(row, dim + k)] = plus[a] / largest;
                self.down[(row, dim + k)] = minus[a] / largest;
            }
            self.rate[k] = lambda;
            self.rate[dim + k] = lambda;
        }
        trace!(
            "layer {index}: {nd} diffuse modes, slowest decay {:.3e} 1/m",
            self.rate.rows(0, nd).iter().copied().fold(f64::INFINITY, f64::min)
        );

        // Non-quadrature streams get their own modes, after the diffuse ones
        let alpha = DMatrix::from_fn(nd, nd, |a, b| {
            let extinction = if a == b { ke / mu_d[a] } else { 0. };
            extinction - pa_d[(a, b)] * w_d[b] / mu_d[a]
        });
        let beta = DMatrix::from_fn(nd, nd, |a, b| pb_d[(a, b)] * w_d[b] / mu_d[a]);

        let mut observation_columns = Vec::new();
        let mut col = nd;
        for slot in (0..streams.len()).filter(|&s| kind[s] != StreamKind::Quadrature) {
            let rate = ke / mu[slot];
            if kind[slot] == StreamKind::Observation {
                for p in 0..np {
                    observation_columns.push((slot * np + p, col));
                    col += 1;
                }
                continue;
            }

            // Collimated beam: the diffuse streams follow it at its own rate
            for (column, nu, beam_up, beam_down) in [(col, -rate, 0., 1.), (dim + col, rate, 1., 0.)] {
                let system = DMatrix::from_fn(2 * nd, 2 * nd, |a, b| {
                    let diagonal = if a % nd == b % nd { nu } else { 0. };
                    match (a < nd, b < nd) {
                        (true, true) => diagonal - alpha[(a, b)],
                        (true, false) => beta[(a, b - nd)],
                        (false, true) => -beta[(a - nd, b)],
                        (false, false) => diagonal + alpha[(a - nd, b - nd)],
                    }
                });
                let lu = system.lu();
                for p in 0..np {
                    let beam = slot * np + p;
                    let rhs = DVector::from_fn(2 * nd, |a, _| {
                        let row = diffuse[a % nd];
                        let same = pa[(row, beam)];
                        let opposite = pb[(row, beam)];
                        if a < nd {
                            -(same * beam_up + opposite * beam_down) / mu_d[a]
                        } else {
                            (opposite * beam_up + same * beam_down) / mu_d[a - nd]
                        }
                    });
                    let response = lu
                        .solve(&rhs)
                        .filter(|y| y.iter().all(|v| v.is_finite()))
                        .ok_or_else(|| {
                            RtmError::instability(index, "collimated beam resonates with a diffuse mode")
                        })?;

                    let column = column + p;
                    self.up[(beam, column)] = beam_up;
                    self.down[(beam, column)] = beam_down;
                    for (a, &row) in diffuse.iter().enumerate() {
                        self.up[(row, column)] = response[a];
                        self.down[(row, column)] = response[nd + a];
                    }
                    self.rate[column] = rate;
                }
            }
            col += np;
        }

        self.observation_response(ke, pa, pb, streams, np, &observation_columns);
        for (row, col) in observation_columns {
            self.own_modes(row, col, ke / mu[row / np]);
        }
        Ok(())
    }

    /// Modes of a null vector `s` of the sum operator, with `t` solving
    /// `Y⁻ t = s`: a constant isotropic mode stored in column `k`, and a mode
    /// linear in depth anchored at the bottom in column `dim + k`.
    fn conservative_modes(
        &mut self,
        k: usize,
        diffuse: &[usize],
        t: &DVector<f64>,
        s: &DVector<f64>,
        norm: &DVector<f64>,
    ) {
        let dim = self.dim;
        let s = s.component_div(norm);
        let t = t.component_div(norm);
        let (s_max, t_max) = (s.amax(), t.amax());
        for (a, &row) in diffuse.iter().enumerate() {
            self.up[(row, k)] = s[a] / s_max;
            self.down[(row, k)] = s[a] / s_max;
            self.up[(row, dim + k)] = -t[a] / t_max;
            self.down[(row, dim + k)] = t[a] / t_max;
            self.up_secular[(row, dim + k)] = -s[a] / t_max;
            self.down_secular[(row, dim + k)] = -s[a] / t_max;
        }
        self.rate[k] = 0.;
        self.rate[dim + k] = 0.;
    }

    /// Intensity scattered into the observation streams by every other mode.
    fn observation_response(
        &mut self,
        ke: f64,
        pa: &DMatrix<f64>,
        pb: &DMatrix<f64>,
        streams: &MediumStreams,
        np: usize,
        observation_columns: &[(usize, usize)],
    ) {
        let dim = self.dim;
        let weight = DVector::from_fn(dim, |row, _| streams.weight()[row / np]);
        let up_w = DMatrix::from_fn(dim, 2 * dim, |r, c| weight[r] * self.up[(r, c)]);
        let down_w = DMatrix::from_fn(dim, 2 * dim, |r, c| weight[r] * self.down[(r, c)]);
        let into_up = pa * &up_w + pb * &down_w;
        let into_down = pb * &up_w + pa * &down_w;
        let up_h = DMatrix::from_fn(dim, 2 * dim, |r, c| weight[r] * self.up_secular[(r, c)]);
        let down_h = DMatrix::from_fn(dim, 2 * dim, |r, c| weight[r] * self.down_secular[(r, c)]);
        let secular_up = pa * &up_h + pb * &down_h;
        let secular_down = pb * &up_h + pa * &down_h;

        let own: Vec<usize> = observation_columns
            .iter()
            .flat_map(|&(_, col)| [col, dim + col])
            .collect();

        for &(row, _) in observation_columns {
            let mu = streams.mu()[row / np];
            for col in (0..2 * dim).filter(|col| !own.contains(col)) {
                let nu = if col < dim { -self.rate[col] } else { self.rate[col] };

                let denominator = ke - mu * nu;
                if denominator.abs() > RESONANCE * ke {
                    let h = secular_up[(row, col)] / denominator;
                    self.up_secular[(row, col)] = h;
                    self.up[(row, col)] = (into_up[(row, col)] + mu * h) / denominator;
                } else {
                    self.up_secular[(row, col)] = -into_up[(row, col)] / mu;
                }
                let denominator = ke + mu * nu;
                if denominator.abs() > RESONANCE * ke {
                    let h = secular_down[(row, col)] / denominator;
                    self.down_secular[(row, col)] = h;
                    self.down[(row, col)] = (into_down[(row, col)] - mu * h) / denominator;
                } else {
                    self.down_secular[(row, col)] = into_down[(row, col)] / mu;
                }
            }
        }
    }

    /// Number of components, `M`.
    pub(crate) fn dim(&self) -> usize {
        self.dim
    }

    pub(crate) fn thickness(&self) -> f64 {
        self.thickness
    }

    pub(crate) fn is_semi_infinite(&self) -> bool {
        self.thickness.is_infinite()
    }

    pub(crate) fn particular(&self) -> &DVector<f64> {
        &self.particular
    }

    /// Modes evaluated at `depth` below the top of the layer.
    pub(crate) fn at_depth(&self, depth: f64) -> Boundary {
        let mut at = Boundary {
            up: DMatrix::zeros(self.dim, 2 * self.dim),
            down: DMatrix::zeros(self.dim, 2 * self.dim),
        };
        for col in 0..2 * self.dim {
            let offset = if col < self.dim { depth } else { depth - self.thickness };
            let factor = (-self.rate[col] * offset.abs()).exp();
            // Also covers the up modes of a semi-infinite layer
            if factor == 0. || offset.is_infinite() {
                continue;
            }
            at.up.set_column(
                col,
                &((self.up.column(col) + self.up_secular.column(col) * offset) * factor),
            );
            at.down.set_column(
                col,
                &((self.down.column(col) + self.down_secular.column(col) * offset) * factor),
            );
        }
        at
    }

    pub(crate) fn top(&self) -> Boundary {
        self.at_depth(0.)
    }

    pub(crate) fn bottom(&self) -> Boundary {
        self.at_depth(self.thickness)
    }
}
