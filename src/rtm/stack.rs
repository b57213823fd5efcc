//! Boundary-value problem coupling the layers of a stack.
//!
//! The unknowns of layer `l` are the amplitudes `x_l = [a; b]` of its down and
//! up modes. Each layer contributes two block rows: the down-welling intensity
//! at its top (transmitted from above plus its own up-welling reflected by the
//! upper interface), and the up-welling intensity at its bottom (transmitted
//! from below plus its own down-welling reflected by the lower boundary).
//! The result is block tridiagonal and is solved by block elimination.

use log::trace;
use nalgebra::{DMatrix, DVector};

use super::interface::InterfaceOperators;
use super::layer::LayerModes;
use crate::error::{RtmError, RtmResult};

/// Reflection and emission of the lower boundary of the stack.
#[derive(Debug, Clone)]
pub(crate) struct BottomBoundary {
    pub reflection: DMatrix<f64>,
    /// Emitted intensity, emissivity times temperature
    pub emission: DVector<f64>,
}

/// `rows × m.ncols()` matrix whose first `scale.len()` rows are the rows of
/// `m` scaled by `scale`.
pub(crate) fn scale_rows(scale: &DVector<f64>, m: &DMatrix<f64>, rows: usize) -> DMatrix<f64> {
    let mut out = DMatrix::zeros(rows, m.ncols());
    for (r, &factor) in scale.iter().enumerate() {
        out.row_mut(r).copy_from(&(m.row(r) * factor));
    }
    out
}

fn scale_vector(scale: &DVector<f64>, v: &DVector<f64>, rows: usize) -> DVector<f64> {
    DVector::from_fn(rows, |r, _| if r < scale.len() { scale[r] * v[r] } else { 0. })
}

fn add_to_columns(m: &mut DMatrix<f64>, v: &DVector<f64>) {
    for mut column in m.column_iter_mut() {
        column += v;
    }
}

/// Modal amplitudes of every layer of a stack for one azimuthal mode.
///
/// The columns are independent right-hand sides: one for a radiometer, one
/// per incident beam and polarization for a radar.
#[derive(Debug, Clone)]
pub struct IntensityField {
    layers: Vec<LayerModes>,
    amplitudes: Vec<DMatrix<f64>>,
}

impl IntensityField {
    /// Number of layers.
    pub fn n_layers(&self) -> usize {
        self.layers.len()
    }

    /// Number of right-hand sides.
    pub fn n_columns(&self) -> usize {
        self.amplitudes.first().map_or(0, |x| x.ncols())
    }

    /// Up- and down-welling intensities at `depth` (m) below the top of
    /// `layer`, one row per `slot * npol + pol` of the layer's streams.
    pub fn intensity(&self, layer: usize, depth: f64) -> RtmResult<(DMatrix<f64>, DMatrix<f64>)> {
        let modes = self
            .layers
            .get(layer)
            .ok_or_else(|| RtmError::config(format!("no layer {layer} in the stack")))?;
        if !(0. ..=modes.thickness()).contains(&depth) || depth.is_infinite() {
            return Err(RtmError::config(format!(
                "depth {depth} m is outside of layer {layer}"
            )));
        }
        let at = modes.at_depth(depth);
        let mut up = &at.up * &self.amplitudes[layer];
        let mut down = &at.down * &self.amplitudes[layer];
        add_to_columns(&mut up, modes.particular());
        add_to_columns(&mut down, modes.particular());
        Ok((up, down))
    }

    /// Up-welling intensity just below the surface.
    pub(crate) fn upwelling_top(&self) -> DMatrix<f64> {
        let modes = &self.layers[0];
        let mut up = &modes.top().up * &self.amplitudes[0];
        add_to_columns(&mut up, modes.particular());
        up
    }
}

/// Solve the stack for the down-welling intensity `sky` in air.
///
/// `interfaces[l]` is the interface at the top of layer `l`, `interfaces[0]`
/// being the surface.
pub(crate) fn solve_stack(
    layers: Vec<LayerModes>,
    interfaces: &[InterfaceOperators],
    bottom: &BottomBoundary,
    sky: &DMatrix<f64>,
    condition_limit: f64,
) -> RtmResult<IntensityField> {
    let n = layers.len();
    let top: Vec<_> = layers.iter().map(LayerModes::top).collect();
    let base: Vec<_> = layers.iter().map(LayerModes::bottom).collect();
    let columns = sky.ncols();

    let mut elimination: Vec<(DMatrix<f64>, DMatrix<f64>)> = Vec::with_capacity(n);
    for (l, modes) in layers.iter().enumerate() {
        let dim = modes.dim();
        let p = modes.particular();
        let above = &interfaces[l];

        let mut block = DMatrix::zeros(2 * dim, 2 * dim);
        let mut rhs = DMatrix::zeros(2 * dim, columns);

        // Down-welling at the top of the layer
        block
            .rows_mut(0, dim)
            .copy_from(&(&top[l].down - scale_rows(&above.r_bottom, &top[l].up, dim)));
        let mut incoming = if l == 0 {
            scale_rows(&above.t_down, sky, dim)
        } else {
            let previous = layers[l - 1].particular();
            DMatrix::from_columns(&vec![scale_vector(&above.t_down, previous, dim); columns])
        };
        add_to_columns(&mut incoming, &(above.r_bottom.component_mul(p) - p));
        rhs.rows_mut(0, dim).copy_from(&incoming);

        // Up-welling at the bottom of the layer
        let mut upper = None;
        if modes.is_semi_infinite() {
            block
                .view_mut((dim, dim), (dim, dim))
                .copy_from(&DMatrix::identity(dim, dim));
        } else if l + 1 == n {
            block
                .rows_mut(dim, dim)
                .copy_from(&(&base[l].up - &bottom.reflection * &base[l].down));
            let source = &bottom.reflection * p - p + &bottom.emission;
            for c in 0..columns {
                rhs.view_mut((dim, c), (dim, 1)).copy_from(&source);
            }
        } else {
            let below = &interfaces[l + 1];
            let next = &layers[l + 1];
            block
                .rows_mut(dim, dim)
                .copy_from(&(&base[l].up - scale_rows(&below.r_top, &base[l].down, dim)));
            let source = below.r_top.component_mul(p) - p
                + scale_vector(&below.t_up, next.particular(), dim);
            for c in 0..columns {
                rhs.view_mut((dim, c), (dim, 1)).copy_from(&source);
            }
            let mut coupling = DMatrix::zeros(2 * dim, 2 * next.dim());
            coupling
                .rows_mut(dim, dim)
                .copy_from(&(-scale_rows(&below.t_up, &top[l + 1].up, dim)));
            upper = Some(coupling);
        }

        // Eliminate the coupling with the layer above
        if l > 0 {
            let (g, h) = &elimination[l - 1];
            let mut coupling = DMatrix::zeros(2 * dim, g.nrows());
            coupling
                .rows_mut(0, dim)
                .copy_from(&(-scale_rows(&above.t_down, &base[l - 1].down, dim)));
            block -= &coupling * g;
            rhs -= &coupling * h;
        }

        let lu = block.lu();
        let pivots = lu.u().diagonal().abs();
        let (smallest, largest) = (pivots.min(), pivots.max());
        trace!("stack layer {l}: pivot ratio {:.3e}", smallest / largest);
        if !(smallest > condition_limit * largest) {
            return Err(RtmError::IllConditionedStack(format!(
                "pivot ratio {:.2e} of layer {l} is below {condition_limit:.0e}",
                smallest / largest
            )));
        }
        let singular = || RtmError::IllConditionedStack(format!("block of layer {l} is singular"));
        let g = match upper {
            Some(coupling) => lu.solve(&coupling).ok_or_else(singular)?,
            None => DMatrix::zeros(2 * dim, 0),
        };
        let h = lu.solve(&rhs).ok_or_else(singular)?;
        elimination.push((g, h));
    }

    // Back substitution
    let mut amplitudes = vec![DMatrix::zeros(0, 0); n];
    for l in (0..n).rev() {
        let (g, h) = &elimination[l];
        amplitudes[l] = if l + 1 < n {
            h - g * &amplitudes[l + 1]
        } else {
            h.clone()
        };
        if amplitudes[l].iter().any(|v| !v.is_finite()) {
            return Err(RtmError::IllConditionedStack(format!(
                "amplitudes of layer {l} are not finite"
            )));
        }
    }

    Ok(IntensityField { layers, amplitudes })
}
