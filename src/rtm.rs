//! Discrete-ordinate radiative transfer (DORT) for layered media.
//!
//! A solve goes through these stages, each in its own module:
//!
//! 1. [`streams`]: one angular discretisation shared by all media, linked by
//!    Snell's law;
//! 2. `phase` and `layer`: the azimuthal Fourier modes of each layer's phase
//!    matrix, then the modal solution inside each layer;
//! 3. [`interface`]: reflection and transmission between adjacent media;
//! 4. [`stack`]: the boundary-value problem of the whole stack, solved by
//!    block elimination;
//! 5. `outcome`: brightness temperatures or backscatter above the atmosphere.
//!
//! Radiometers only need the azimuthally symmetric mode. Radars sum the modes
//! `0..=m_max` in the backward plane.

pub mod interface;
mod layer;
mod outcome;
mod phase;
pub mod stack;
pub mod streams;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use log::{debug, warn};
use nalgebra::{DMatrix, DVector};
use ndarray::Array4;
use num_complex::Complex64;

use self::interface::{Flat, Interface, InterfaceOperators};
use self::layer::LayerModes;
use self::outcome::Sky;
use self::phase::{npol, PhaseOperator};
use self::stack::{solve_stack, BottomBoundary, IntensityField};
use self::streams::{refractive_index, MediumStreams, StreamKind, StreamSet};
use crate::atmosphere::Atmosphere;
use crate::config::DortOptions;
use crate::emmodel::LayerOptics;
use crate::error::{RtmError, RtmResult};
use crate::permittivity::PermittivityCache;
use crate::result::{ActiveResult, PassiveResult, SolveResult};
use crate::sensor::{Sensor, SensorMode};
use crate::snowpack::Snowpack;

/// The DORT solver. It holds no state between solves and may be shared
/// across threads.
#[derive(Debug, Clone)]
pub struct Dort {
    options: DortOptions,
    interface: Arc<dyn Interface>,
}

impl Default for Dort {
    fn default() -> Self {
        Self {
            options: DortOptions::default(),
            interface: Arc::new(Flat),
        }
    }
}

/// Everything about a stack that does not depend on the azimuthal mode.
struct Discretization {
    streams: StreamSet,
    air: MediumStreams,
    media: Vec<MediumStreams>,
    optics: Vec<Box<dyn LayerOptics>>,
    phase: Vec<PhaseOperator>,
}

impl Dort {
    /// Build a solver with validated options.
    pub fn new(options: DortOptions) -> RtmResult<Self> {
        options.validate()?;
        Ok(Self {
            options,
            ..Default::default()
        })
    }

    /// Use another kind of boundary between layers.
    pub fn with_interface(self, interface: Arc<dyn Interface>) -> Self {
        Self { interface, ..self }
    }

    /// Solver options.
    pub fn options(&self) -> &DortOptions {
        &self.options
    }

    /// Compute the brightness temperature (radiometer) or the backscatter
    /// (radar) of `snowpack` seen by `sensor` through `atmosphere`.
    ///
    /// Without atmosphere, the sky is cold and transparent.
    pub fn solve(
        &self,
        snowpack: &Snowpack,
        sensor: &Sensor,
        atmosphere: Option<&dyn Atmosphere>,
    ) -> RtmResult<SolveResult> {
        let frequency = sensor.frequency();
        let disc = self.discretize(snowpack, sensor)?;
        let sky = Sky::new(atmosphere, frequency);
        let theta_deg = sensor.theta_deg();

        match sensor.mode() {
            SensorMode::Passive => {
                let source = sky.thermal(&disc.air);
                let (field, surface) = self.solve_mode(&disc, snowpack, frequency, 0, &source, true)?;
                let emergent = outcome::emergent(&field, &surface, &source);
                let tb = outcome::brightness_temperature(&emergent, &disc.streams, &disc.air, &sky, sensor)?;
                debug!("dort: TbV = {:.3} K at {}°", tb[[0, 0]], theta_deg[0]);
                Ok(SolveResult::Passive(PassiveResult::new(
                    theta_deg,
                    tb,
                    sensor.channel_map().clone(),
                )?))
            }
            SensorMode::Active => {
                let n = theta_deg.len();
                let mut intensity = Array4::zeros((n, 3, n, 3));
                for m in 0..=self.options.m_max {
                    let np = npol(m);
                    let beams = sky.beams(&disc.streams, &disc.air, theta_deg, m, np)?;
                    let (field, surface) = self.solve_mode(&disc, snowpack, frequency, m, &beams, false)?;
                    let emergent = outcome::emergent(&field, &surface, &beams);
                    outcome::accumulate_backscatter(
                        &mut intensity,
                        &emergent,
                        &disc.streams,
                        &disc.air,
                        &sky,
                        sensor,
                        m,
                        np,
                    )?;
                }
                Ok(SolveResult::Active(ActiveResult::new(
                    theta_deg,
                    intensity,
                    sensor.channel_map().clone(),
                )?))
            }
        }
    }

    /// Thermal intensity field inside `snowpack`, for inspecting up- and
    /// down-welling brightness temperatures at any depth.
    pub fn thermal_field(
        &self,
        snowpack: &Snowpack,
        sensor: &Sensor,
        atmosphere: Option<&dyn Atmosphere>,
    ) -> RtmResult<IntensityField> {
        let frequency = sensor.frequency();
        let passive = Sensor::passive(frequency, sensor.theta_deg())?;
        let disc = self.discretize(snowpack, &passive)?;
        let source = Sky::new(atmosphere, frequency).thermal(&disc.air);
        let (field, _) = self.solve_mode(&disc, snowpack, frequency, 0, &source, true)?;
        Ok(field)
    }

    fn discretize(&self, snowpack: &Snowpack, sensor: &Sensor) -> RtmResult<Discretization> {
        let frequency = sensor.frequency();
        let mut cache = PermittivityCache::new();
        let optics = snowpack
            .layers()
            .iter()
            .map(|layer| layer.optics(frequency, &mut cache))
            .collect::<RtmResult<Vec<_>>>()?;

        let indices: Vec<f64> = optics
            .iter()
            .map(|o| refractive_index(o.effective_permittivity()))
            .collect();
        let streams = StreamSet::new(&self.options, &indices, sensor.theta_deg(), sensor.mode())?;
        let air = streams.in_medium(Complex64::new(1., 0.));
        let media: Vec<_> = optics
            .iter()
            .map(|o| streams.in_medium(o.effective_permittivity()))
            .collect();

        let m_max = match sensor.mode() {
            SensorMode::Passive => 0,
            SensorMode::Active => self.options.m_max,
        };
        let phase = optics
            .iter()
            .zip(&media)
            .map(|(o, medium)| {
                PhaseOperator::new(
                    o.as_ref(),
                    medium,
                    m_max,
                    self.options.n_azimuth,
                    self.options.phase_normalization,
                )
            })
            .collect();

        debug!(
            "dort: {} layers, {} streams in air, {} in the densest medium (n = {:.3}), m_max = {m_max}",
            media.len(),
            air.len(),
            media.iter().map(MediumStreams::len).max().unwrap_or(0),
            indices.iter().copied().fold(1., f64::max),
        );
        Ok(Discretization {
            streams,
            air,
            media,
            optics,
            phase,
        })
    }

    /// Solve azimuthal mode `m` for the down-welling intensity `source` in
    /// air, with thermal emission when `thermal` is set. Also returns the
    /// operators of the surface.
    fn solve_mode(
        &self,
        disc: &Discretization,
        snowpack: &Snowpack,
        frequency: f64,
        m: usize,
        source: &DMatrix<f64>,
        thermal: bool,
    ) -> RtmResult<(IntensityField, InterfaceOperators)> {
        let np = npol(m);
        let layers = snowpack.layers();

        let modes = layers
            .iter()
            .enumerate()
            .map(|(l, layer)| {
                LayerModes::new(
                    l,
                    disc.optics[l].as_ref(),
                    &disc.phase[l],
                    &disc.media[l],
                    m,
                    layer.thickness(),
                    thermal.then(|| layer.temperature()),
                    &self.options,
                )
            })
            .collect::<RtmResult<Vec<_>>>()?;

        let mut interfaces: Vec<_> = (0..layers.len())
            .map(|l| {
                let upper = if l == 0 { &disc.air } else { &disc.media[l - 1] };
                InterfaceOperators::new(self.interface.as_ref(), upper, &disc.media[l], np)
            })
            .collect();

        let bottom = self.bottom_boundary(disc, snowpack, frequency, m, thermal)?;
        let field = solve_stack(modes, &interfaces, &bottom, source, self.options.condition_limit)?;
        Ok((field, interfaces.swap_remove(0)))
    }

    fn bottom_boundary(
        &self,
        disc: &Discretization,
        snowpack: &Snowpack,
        frequency: f64,
        m: usize,
        thermal: bool,
    ) -> RtmResult<BottomBoundary> {
        let np = npol(m);
        let (last, layer) = match (disc.media.last(), snowpack.layers().last()) {
            (Some(medium), Some(layer)) => (medium, layer),
            _ => return Err(RtmError::config("a snowpack needs at least one layer")),
        };
        let dim = last.len() * np;

        if layer.thickness().is_infinite() {
            if snowpack.substrate().is_some() && m == 0 {
                warn!("the substrate under an infinitely thick layer is ignored");
            }
            return Ok(BottomBoundary {
                reflection: DMatrix::zeros(dim, dim),
                emission: DVector::zeros(dim),
            });
        }

        let boundary = match snowpack.substrate() {
            Some(substrate) => {
                let emission = if thermal {
                    substrate.emissivity(frequency, last, np)? * substrate.temperature()
                } else {
                    DVector::zeros(dim)
                };
                BottomBoundary {
                    reflection: substrate.reflection(frequency, last, m, np)?,
                    emission,
                }
            }
            // Black body at the temperature of the last layer
            None => BottomBoundary {
                reflection: DMatrix::zeros(dim, dim),
                emission: DVector::from_fn(dim, |row, _| {
                    let diffuse = last.kind()[row / np] != StreamKind::Collimated;
                    if thermal && diffuse && row % np < 2 {
                        layer.temperature()
                    } else {
                        0.
                    }
                }),
            },
        };

        if boundary.reflection.shape() != (dim, dim) || boundary.emission.len() != dim {
            return Err(RtmError::config(format!(
                "substrate operators do not match the {dim} components of the last layer"
            )));
        }
        Ok(boundary)
    }
}
