//! Microwave emission and backscatter of layered snow, ice and soil.
//!
//! A [`Snowpack`] is a stack of plane-parallel [`Layer`]s over an optional
//! [`Substrate`]. The [`Dort`] solver computes the brightness temperature
//! seen by a radiometer or the backscattering coefficients seen by a radar,
//! both described by a [`Sensor`].
//!
//! Physics is pluggable through traits: [`PermittivityModel`] for the
//! dielectric properties of the constituents, [`ScatteringModel`] for the
//! scattering theory of each layer, [`Atmosphere`] above the snowpack and
//! [`Interface`] between layers.
//!
//! The Python extension module is built with the `python` feature.

pub mod atmosphere;
pub mod batch;
pub mod config;
pub mod emmodel;
pub mod error;
pub mod microstructure;
pub mod permittivity;
pub mod result;
pub mod rtm;
pub mod sensor;
pub mod snowpack;
pub mod substrate;

#[cfg(feature = "python")]
mod python;

pub use atmosphere::{Atmosphere, SimpleIsotropicAtmosphere};
pub use batch::{Batch, Request};
pub use config::{DortOptions, StreamMode};
pub use emmodel::{LayerOptics, ScatteringModel};
pub use error::{RtmError, RtmResult};
pub use microstructure::Microstructure;
pub use permittivity::PermittivityModel;
pub use result::{ActiveResult, PassiveResult, SolveResult};
pub use rtm::interface::Interface;
pub use rtm::Dort;
pub use sensor::{Polarization, Sensor, SensorMode};
pub use snowpack::{Layer, Snowpack};
pub use substrate::Substrate;
