//! Atmosphere above the snowpack, seen as a fixed boundary condition.

use std::fmt::Debug;

use crate::error::{RtmError, RtmResult};

/// Radiative properties of a non-scattering atmosphere.
///
/// All quantities may depend on frequency (Hz) and on the cosine of the
/// zenith angle in air. Brightness temperatures are in K.
pub trait Atmosphere: Debug + Send + Sync {
    /// Down-welling brightness temperature at the surface.
    fn tbdown(&self, frequency: f64, mu: f64) -> f64;

    /// Up-welling brightness temperature emitted by the atmosphere itself at
    /// the top of the atmosphere.
    fn tbup(&self, frequency: f64, mu: f64) -> f64;

    /// Transmissivity of the whole atmosphere.
    fn trans(&self, frequency: f64, mu: f64) -> f64;
}

/// Atmosphere with the same properties at every angle and frequency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimpleIsotropicAtmosphere {
    tbdown: f64,
    tbup: f64,
    trans: f64,
}

impl SimpleIsotropicAtmosphere {
    /// Build the atmosphere. The transmissivity must be in `[0, 1]`.
    pub fn new(tbdown: f64, tbup: f64, trans: f64) -> RtmResult<Self> {
        if !(0. ..=1.).contains(&trans) {
            return Err(RtmError::Domain {
                provider: "simple_isotropic_atmosphere",
                quantity: "trans",
                value: trans,
            });
        }
        for (quantity, value) in [("tbdown", tbdown), ("tbup", tbup)] {
            if !(value.is_finite() && value >= 0.) {
                return Err(RtmError::Domain {
                    provider: "simple_isotropic_atmosphere",
                    quantity,
                    value,
                });
            }
        }
        Ok(Self {
            tbdown,
            tbup,
            trans,
        })
    }
}

impl Atmosphere for SimpleIsotropicAtmosphere {
    fn tbdown(&self, _: f64, _: f64) -> f64 {
        self.tbdown
    }

    fn tbup(&self, _: f64, _: f64) -> f64 {
        self.tbup
    }

    fn trans(&self, _: f64, _: f64) -> f64 {
        self.trans
    }
}
