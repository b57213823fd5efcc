//! From the intensity field to brightness temperatures and backscatter.

use std::f64::consts::PI;

use nalgebra::DMatrix;
use ndarray::{Array2, Array4};

use super::interface::InterfaceOperators;
use super::stack::{scale_rows, IntensityField};
use super::streams::{MediumStreams, StreamKind, StreamSet};
use crate::atmosphere::Atmosphere;
use crate::error::{RtmError, RtmResult};
use crate::sensor::Sensor;

/// Atmosphere seen by the solver: transparent and cold when none is given.
pub(crate) struct Sky<'a> {
    atmosphere: Option<&'a dyn Atmosphere>,
    frequency: f64,
}

impl<'a> Sky<'a> {
    pub(crate) fn new(atmosphere: Option<&'a dyn Atmosphere>, frequency: f64) -> Self {
        Self {
            atmosphere,
            frequency,
        }
    }

    fn tbdown(&self, mu: f64) -> f64 {
        self.atmosphere.map_or(0., |a| a.tbdown(self.frequency, mu))
    }

    fn tbup(&self, mu: f64) -> f64 {
        self.atmosphere.map_or(0., |a| a.tbup(self.frequency, mu))
    }

    fn trans(&self, mu: f64) -> f64 {
        self.atmosphere.map_or(1., |a| a.trans(self.frequency, mu))
    }

    /// Down-welling brightness temperature on the V and H components of
    /// every stream in air.
    pub(crate) fn thermal(&self, air: &MediumStreams) -> DMatrix<f64> {
        DMatrix::from_fn(air.len() * 2, 1, |row, _| self.tbdown(air.mu()[row / 2]))
    }

    /// One unit-flux beam per incidence angle and polarization (V, H),
    /// expanded on the azimuthal mode `m`.
    pub(crate) fn beams(
        &self,
        streams: &StreamSet,
        air: &MediumStreams,
        theta_deg: &[f64],
        m: usize,
        npol: usize,
    ) -> RtmResult<DMatrix<f64>> {
        let mut beams = DMatrix::zeros(air.len() * npol, theta_deg.len() * 2);
        let expansion = (if m == 0 { 1. } else { 2. }) / (2. * PI);
        for k in 0..theta_deg.len() {
            let slot = sensor_slot(streams, theta_deg, k, StreamKind::Collimated)?;
            let amplitude = self.trans(air.mu()[slot]) * expansion;
            for q in 0..2 {
                beams[(slot * npol + q, k * 2 + q)] = amplitude;
            }
        }
        Ok(beams)
    }
}

fn sensor_slot(streams: &StreamSet, theta_deg: &[f64], k: usize, kind: StreamKind) -> RtmResult<usize> {
    streams
        .sensor_slot(theta_deg, k, kind)
        .ok_or_else(|| RtmError::config(format!("no stream for sensor angle {}°", theta_deg[k])))
}

/// Intensity leaving the surface upward: transmitted from the first layer
/// plus the sky reflected by the surface.
pub(crate) fn emergent(
    field: &IntensityField,
    surface: &InterfaceOperators,
    sky: &DMatrix<f64>,
) -> DMatrix<f64> {
    let rows = surface.r_top.len();
    scale_rows(&surface.t_up, &field.upwelling_top(), rows) + scale_rows(&surface.r_top, sky, rows)
}

/// Brightness temperatures `(theta, [V, H])` seen above the atmosphere.
pub(crate) fn brightness_temperature(
    emergent: &DMatrix<f64>,
    streams: &StreamSet,
    air: &MediumStreams,
    sky: &Sky<'_>,
    sensor: &Sensor,
) -> RtmResult<Array2<f64>> {
    let theta_deg = sensor.theta_deg();
    let mut tb = Array2::zeros((theta_deg.len(), 2));
    for k in 0..theta_deg.len() {
        let slot = sensor_slot(streams, theta_deg, k, StreamKind::Observation)?;
        let mu = air.mu()[slot];
        for p in 0..2 {
            tb[[k, p]] = sky.tbup(mu) + sky.trans(mu) * emergent[(slot * 2 + p, 0)];
        }
    }
    Ok(tb)
}

/// Add the contribution of azimuthal mode `m` to the backward-plane
/// intensities `(theta, pol, theta_inc, pol_inc)`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn accumulate_backscatter(
    intensity: &mut Array4<f64>,
    emergent: &DMatrix<f64>,
    streams: &StreamSet,
    air: &MediumStreams,
    sky: &Sky<'_>,
    sensor: &Sensor,
    m: usize,
    npol: usize,
) -> RtmResult<()> {
    let theta_deg = sensor.theta_deg();
    // cos(mπ) selects the backward plane
    let sign = if m % 2 == 0 { 1. } else { -1. };
    for k in 0..theta_deg.len() {
        let slot = sensor_slot(streams, theta_deg, k, StreamKind::Observation)?;
        let trans = sky.trans(air.mu()[slot]);
        for p in 0..2 {
            for k_inc in 0..theta_deg.len() {
                for q in 0..2 {
                    intensity[[k, p, k_inc, q]] +=
                        sign * trans * emergent[(slot * npol + p, k_inc * 2 + q)];
                }
            }
        }
    }
    Ok(())
}
