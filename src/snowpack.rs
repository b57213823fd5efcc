//! Layered media: snow, ice or any two-phase mixture, optionally over a
//! substrate.

use std::fmt;
use std::sync::Arc;

use num_complex::Complex64;

use crate::emmodel::{LayerOptics, ScatteringModel};
use crate::error::{RtmError, RtmResult};
use crate::microstructure::Microstructure;
use crate::permittivity::{
    polder_van_santen, ConstantPermittivity, PermittivityCache, PermittivityModel, WetIceBohren83,
    DENSITY_OF_ICE,
};
use crate::substrate::Substrate;

/// One homogeneous layer. Layers are immutable once built.
#[derive(Clone)]
pub struct Layer {
    /// Thickness in m, possibly infinite for the bottom layer.
    thickness: f64,
    /// Physical temperature in K.
    temperature: f64,
    /// Fractional volume of the inclusions.
    frac_volume: f64,
    /// Liquid water content of the inclusions, relative to their volume.
    liquid_water: f64,
    microstructure: Option<Microstructure>,
    background: Arc<dyn PermittivityModel>,
    inclusion: Arc<dyn PermittivityModel>,
    model: Arc<dyn ScatteringModel>,
}

impl fmt::Debug for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Layer")
            .field("thickness", &self.thickness)
            .field("temperature", &self.temperature)
            .field("frac_volume", &self.frac_volume)
            .field("liquid_water", &self.liquid_water)
            .field("microstructure", &self.microstructure)
            .field("background", &self.background.name())
            .field("inclusion", &self.inclusion.name())
            .field("model", &self.model.name())
            .finish()
    }
}

impl Layer {
    /// A homogeneous layer whose optics come entirely from `model`, e.g.
    /// [`crate::emmodel::Prescribed`].
    pub fn new(thickness: f64, temperature: f64, model: Arc<dyn ScatteringModel>) -> RtmResult<Self> {
        let layer = Self {
            thickness,
            temperature,
            frac_volume: 0.,
            liquid_water: 0.,
            microstructure: None,
            background: Arc::new(ConstantPermittivity::AIR),
            inclusion: Arc::new(WetIceBohren83),
            model,
        };
        layer.validate()?;
        Ok(layer)
    }

    /// A dry snow layer of `density` kg/m³: ice grains in air.
    pub fn snow(
        thickness: f64,
        temperature: f64,
        density: f64,
        microstructure: Microstructure,
        model: Arc<dyn ScatteringModel>,
    ) -> RtmResult<Self> {
        let layer = Self {
            frac_volume: density / DENSITY_OF_ICE,
            microstructure: Some(microstructure),
            ..Self::new(thickness, temperature, model)?
        };
        layer.validate()?;
        Ok(layer)
    }

    /// Wet the inclusions with a liquid water fraction in `[0, 1]`.
    pub fn with_liquid_water(self, liquid_water: f64) -> RtmResult<Self> {
        let layer = Self {
            liquid_water,
            ..self
        };
        layer.validate()?;
        Ok(layer)
    }

    /// Replace the permittivity of the background and inclusion phases.
    pub fn with_permittivities(
        self,
        background: Arc<dyn PermittivityModel>,
        inclusion: Arc<dyn PermittivityModel>,
    ) -> Self {
        Self {
            background,
            inclusion,
            ..self
        }
    }

    fn validate(&self) -> RtmResult<()> {
        let invalid = |quantity, value| RtmError::Domain {
            provider: "layer",
            quantity,
            value,
        };
        if !(self.thickness > 0.) {
            return Err(invalid("thickness", self.thickness));
        }
        if !(self.temperature.is_finite() && self.temperature > 0.) {
            return Err(invalid("temperature", self.temperature));
        }
        if !(0. ..=1.).contains(&self.frac_volume) {
            return Err(invalid("frac_volume", self.frac_volume));
        }
        if !(0. ..=1.).contains(&self.liquid_water) {
            return Err(invalid("liquid_water", self.liquid_water));
        }
        Ok(())
    }

    /// Thickness in m.
    pub fn thickness(&self) -> f64 {
        self.thickness
    }

    /// Physical temperature in K.
    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    /// Fractional volume of the inclusions.
    pub fn frac_volume(&self) -> f64 {
        self.frac_volume
    }

    /// Liquid water fraction of the inclusions.
    pub fn liquid_water(&self) -> f64 {
        self.liquid_water
    }

    /// Microstructure, if the layer has one.
    pub fn microstructure(&self) -> Option<&Microstructure> {
        self.microstructure.as_ref()
    }

    /// Scattering theory of the layer.
    pub fn model(&self) -> &Arc<dyn ScatteringModel> {
        &self.model
    }

    /// Permittivities of the background and of the inclusions.
    pub fn permittivities(
        &self,
        frequency: f64,
        cache: &mut PermittivityCache,
    ) -> RtmResult<(Complex64, Complex64)> {
        let e0 = cache.get(self.background.as_ref(), frequency, self.temperature, 0.)?;
        let eps = cache.get(
            self.inclusion.as_ref(),
            frequency,
            self.temperature,
            self.liquid_water,
        )?;
        Ok((e0, eps))
    }

    /// Effective permittivity of the mixture (Polder-van Santen).
    pub fn effective_permittivity(
        &self,
        frequency: f64,
        cache: &mut PermittivityCache,
    ) -> RtmResult<Complex64> {
        let (e0, eps) = self.permittivities(frequency, cache)?;
        Ok(polder_van_santen(self.frac_volume, e0, eps))
    }

    /// Evaluate the layer's scattering model.
    pub fn optics(
        &self,
        frequency: f64,
        cache: &mut PermittivityCache,
    ) -> RtmResult<Box<dyn LayerOptics>> {
        self.model.optics(frequency, self, cache)
    }
}

/// A stack of layers, from top to bottom, over an optional substrate.
///
/// Without a substrate, the last layer sits on a non-reflecting black body at
/// its own temperature.
#[derive(Debug, Clone)]
pub struct Snowpack {
    layers: Vec<Layer>,
    substrate: Option<Arc<dyn Substrate>>,
}

impl Snowpack {
    /// Build a snowpack. Only the bottom layer may be infinitely thick.
    pub fn new(layers: Vec<Layer>) -> RtmResult<Self> {
        if layers.is_empty() {
            return Err(RtmError::config("a snowpack needs at least one layer"));
        }
        if layers[..layers.len() - 1]
            .iter()
            .any(|layer| layer.thickness.is_infinite())
        {
            return Err(RtmError::config("only the bottom layer may be infinitely thick"));
        }
        Ok(Self {
            layers,
            substrate: None,
        })
    }

    /// Put the snowpack on a substrate.
    pub fn with_substrate(self, substrate: Arc<dyn Substrate>) -> Self {
        Self {
            substrate: Some(substrate),
            ..self
        }
    }

    /// The layers, from top to bottom.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// The substrate under the bottom layer, if any.
    pub fn substrate(&self) -> Option<&dyn Substrate> {
        self.substrate.as_deref()
    }
}
