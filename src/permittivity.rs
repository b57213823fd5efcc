//! Permittivity providers and dielectric mixing.
//!
//! All permittivities follow the convention of a positive imaginary part for
//! lossy media.

use std::collections::HashMap;
use std::fmt::Debug;

use num_complex::Complex64;

use crate::error::{RtmError, RtmResult};

/// Temperature of the ice/water triple point, in K.
pub const FREEZING_POINT: f64 = 273.15;

/// Density of pure ice, in kg/m³.
pub const DENSITY_OF_ICE: f64 = 917.;

/// A pure function of frequency (Hz), temperature (K) and liquid water
/// fraction giving a complex permittivity.
pub trait PermittivityModel: Debug + Send + Sync {
    /// Name of the formulation, also used as the cache key.
    fn name(&self) -> &'static str;

    /// Compute the permittivity, or a [`RtmError::Domain`] error outside of
    /// the validity range.
    fn permittivity(
        &self,
        frequency: f64,
        temperature: f64,
        liquid_water: f64,
    ) -> RtmResult<Complex64>;

    /// Whether evaluations may be memoised under [`Self::name`]. Providers
    /// whose result depends on their own parameters return `false`.
    fn cacheable(&self) -> bool {
        true
    }
}

/// A permittivity that does not depend on anything, e.g. air.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantPermittivity(pub Complex64);

impl ConstantPermittivity {
    /// Permittivity of air.
    pub const AIR: Self = Self(Complex64::new(1., 0.));
}

impl PermittivityModel for ConstantPermittivity {
    fn name(&self) -> &'static str {
        "constant"
    }

    fn permittivity(&self, _: f64, _: f64, _: f64) -> RtmResult<Complex64> {
        Ok(self.0)
    }

    fn cacheable(&self) -> bool {
        false
    }
}

/// Pure ice after Mätzler (2006).
///
/// C. Mätzler, "Microwave dielectric properties of ice", in *Thermal
/// Microwave Radiation: Applications for Remote Sensing*, 2006.
#[derive(Debug, Clone, Copy, Default)]
pub struct IceMaetzler06;

impl PermittivityModel for IceMaetzler06 {
    fn name(&self) -> &'static str {
        "ice_maetzler06"
    }

    fn permittivity(&self, frequency: f64, temperature: f64, _: f64) -> RtmResult<Complex64> {
        check_frequency(self.name(), frequency)?;
        // Small tolerance above the melting point for rounding of input data
        if !(temperature > 0. && temperature <= FREEZING_POINT + 0.01) {
            return Err(RtmError::Domain {
                provider: self.name(),
                quantity: "temperature",
                value: temperature,
            });
        }
        Ok(ice_maetzler06(frequency, temperature))
    }
}

fn ice_maetzler06(frequency: f64, temperature: f64) -> Complex64 {
    const B1: f64 = 0.0207;
    const B2: f64 = 1.16e-11;
    const B: f64 = 335.;

    let freq_ghz = frequency * 1e-9;
    let theta = 300. / temperature - 1.;
    let alpha = (0.00504 + 0.0062 * theta) * f64::exp(-22.1 * theta);

    let delta_beta = f64::exp(-9.963 + 0.0372 * (temperature - 273.16));
    let exp_bt = f64::exp(B / temperature);
    let beta_m = (B1 / temperature) * exp_bt / (exp_bt - 1.).powi(2) + B2 * freq_ghz.powi(2);
    let beta = beta_m + delta_beta;

    let real = 3.1884 + 9.1e-4 * (temperature - 273.16);
    let imag = alpha / freq_ghz + beta * freq_ghz;
    Complex64::new(real, imag)
}

/// Pure liquid water after Mätzler (1987), double Debye relaxation.
#[derive(Debug, Clone, Copy, Default)]
pub struct WaterMaetzler87;

impl PermittivityModel for WaterMaetzler87 {
    fn name(&self) -> &'static str {
        "water_maetzler87"
    }

    fn permittivity(&self, frequency: f64, temperature: f64, _: f64) -> RtmResult<Complex64> {
        check_frequency(self.name(), frequency)?;
        // Supercooled water is allowed down to -25°C
        if !(FREEZING_POINT - 25. ..=FREEZING_POINT + 100.).contains(&temperature) {
            return Err(RtmError::Domain {
                provider: self.name(),
                quantity: "temperature",
                value: temperature,
            });
        }
        Ok(water_maetzler87(frequency, temperature))
    }
}

fn water_maetzler87(frequency: f64, temperature: f64) -> Complex64 {
    let freq_ghz = frequency * 1e-9;
    let theta = 1. - 300. / temperature;

    let e0 = 77.66 - 103.3 * theta;
    let e1 = 0.0671 * e0;
    let f1 = 20.2 + 146.4 * theta + 316. * theta * theta;
    let e2 = 3.52 + 7.52 * theta;
    let f2 = 39.8 * f1;

    e2 + (e1 - e2) / Complex64::new(1., -freq_ghz / f2)
        + (e0 - e1) / Complex64::new(1., -freq_ghz / f1)
}

/// Wet ice particles: ice coated by liquid water, after Bohren & Huffman
/// (1983) as given by Ya-Qiu Jin (1996), eq. 8-69.
///
/// The liquid water fraction is the volume of water relative to the volume
/// of ice plus water.
#[derive(Debug, Clone, Copy, Default)]
pub struct WetIceBohren83;

impl PermittivityModel for WetIceBohren83 {
    fn name(&self) -> &'static str {
        "wetice_bohren83"
    }

    fn permittivity(
        &self,
        frequency: f64,
        temperature: f64,
        liquid_water: f64,
    ) -> RtmResult<Complex64> {
        if !(0. ..=1.).contains(&liquid_water) {
            return Err(RtmError::Domain {
                provider: self.name(),
                quantity: "liquid_water",
                value: liquid_water,
            });
        }
        let eps_ice = IceMaetzler06.permittivity(frequency, temperature, 0.)?;
        if liquid_water <= 0. {
            return Ok(eps_ice);
        }
        let eps_water = WaterMaetzler87.permittivity(frequency, temperature, 0.)?;

        let s = 1. - liquid_water;
        let c_plus = eps_ice + 2. * eps_water;
        let c_minus = (eps_ice - eps_water) * s;

        Ok((c_plus + 2. * c_minus) / (c_plus - c_minus) * eps_water)
    }
}

fn check_frequency(provider: &'static str, frequency: f64) -> RtmResult<()> {
    if frequency.is_finite() && frequency > 0. {
        Ok(())
    } else {
        Err(RtmError::Domain {
            provider,
            quantity: "frequency",
            value: frequency,
        })
    }
}

/// Effective permittivity of spherical inclusions of permittivity `eps` at
/// fractional volume `frac_volume` in a host of permittivity `e0`
/// (Polder-van Santen / symmetric Bruggeman).
pub fn polder_van_santen(frac_volume: f64, e0: Complex64, eps: Complex64) -> Complex64 {
    // Root of 2 x² - b x - e0 eps = 0 with a positive real part
    let b = (3. * frac_volume - 1.) * eps + (2. - 3. * frac_volume) * e0;
    (b + (b * b + 8. * e0 * eps).sqrt()) / 4.
}

/// Cache of permittivity evaluations, scoped to a single solve.
///
/// Keys are the model name and the exact bit patterns of the inputs, so a
/// hit always returns what the provider would have returned.
#[derive(Debug, Default)]
pub struct PermittivityCache {
    values: HashMap<(&'static str, u64, u64, u64), Complex64>,
}

impl PermittivityCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value or evaluate `model` and remember the result.
    /// Errors are not cached.
    pub fn get(
        &mut self,
        model: &dyn PermittivityModel,
        frequency: f64,
        temperature: f64,
        liquid_water: f64,
    ) -> RtmResult<Complex64> {
        if !model.cacheable() {
            return model.permittivity(frequency, temperature, liquid_water);
        }
        let key = (
            model.name(),
            frequency.to_bits(),
            temperature.to_bits(),
            liquid_water.to_bits(),
        );
        if let Some(&eps) = self.values.get(&key) {
            return Ok(eps);
        }
        let eps = model.permittivity(frequency, temperature, liquid_water)?;
        self.values.insert(key, eps);
        Ok(eps)
    }

    /// Number of distinct evaluations stored.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if nothing was evaluated yet.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Forget every stored value.
    pub fn clear(&mut self) {
        self.values.clear();
    }
}
