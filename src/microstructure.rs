//! Two-phase microstructures, described by the Fourier transform of their
//! autocorrelation function.

use std::f64::consts::PI;
use std::sync::OnceLock;

use num_complex::Complex64;

use crate::error::{RtmError, RtmResult};
use crate::rtm::streams::gauss_legendre;

/// Number of Gauss-Legendre nodes used for the Percus-Yevick integral.
const N_STRUCTURE_NODES: usize = 16;

/// Microstructure of a layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Microstructure {
    /// Exponential autocorrelation `φ(1-φ) exp(-r/lc)`.
    Exponential {
        /// Correlation length in m
        corr_length: f64,
    },
    /// Sticky hard spheres of equal radius, with the Percus-Yevick structure
    /// factor for Baxter's adhesive potential.
    StickyHardSpheres {
        /// Sphere radius in m
        radius: f64,
        /// Baxter stickiness parameter (large values: non-sticky)
        stickiness: f64,
    },
    /// Uncorrelated spheres of equal radius (structure factor of one).
    IndependentSphere {
        /// Sphere radius in m
        radius: f64,
    },
}

impl Microstructure {
    /// Radius of the scatterers, for the structures made of spheres.
    pub fn radius(&self) -> Option<f64> {
        match *self {
            Microstructure::Exponential { .. } => None,
            Microstructure::StickyHardSpheres { radius, .. }
            | Microstructure::IndependentSphere { radius } => Some(radius),
        }
    }

    /// Fourier transform of the autocorrelation function at wavenumber `k`
    /// (rad/m), for an inclusion fractional volume `frac_volume`.
    pub fn ft_autocorrelation(&self, k: f64, frac_volume: f64) -> RtmResult<f64> {
        Ok(self.autocorrelation(frac_volume)?.ft(k))
    }

    /// Check the parameters at `frac_volume` and precompute what the
    /// spectrum needs.
    pub fn autocorrelation(&self, frac_volume: f64) -> RtmResult<Autocorrelation> {
        let positive = |quantity, value: f64| {
            if value.is_finite() && value > 0. {
                Ok(value)
            } else {
                Err(RtmError::Domain {
                    provider: "microstructure",
                    quantity,
                    value,
                })
            }
        };
        let spectrum = match *self {
            Microstructure::Exponential { corr_length } => Spectrum::Exponential {
                corr_length: positive("corr_length", corr_length)?,
            },
            Microstructure::StickyHardSpheres { radius, stickiness } => Spectrum::Spheres {
                radius: positive("radius", radius)?,
                structure: Some(StickyStructure::new(
                    frac_volume,
                    positive("stickiness", stickiness)?,
                )?),
            },
            Microstructure::IndependentSphere { radius } => Spectrum::Spheres {
                radius: positive("radius", radius)?,
                structure: None,
            },
        };
        Ok(Autocorrelation {
            frac_volume,
            spectrum,
        })
    }
}

/// Autocorrelation spectrum of a microstructure at a given fractional volume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Autocorrelation {
    frac_volume: f64,
    spectrum: Spectrum,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Spectrum {
    Exponential {
        corr_length: f64,
    },
    /// Uncorrelated spheres when `structure` is `None`
    Spheres {
        radius: f64,
        structure: Option<StickyStructure>,
    },
}

impl Autocorrelation {
    /// Fourier transform of the autocorrelation function at wavenumber `k` (rad/m).
    pub fn ft(&self, k: f64) -> f64 {
        let phi = self.frac_volume;
        match self.spectrum {
            Spectrum::Exponential { corr_length } => {
                let kl = k * corr_length;
                phi * (1. - phi) * 8. * PI * corr_length.powi(3) / (1. + kl * kl).powi(2)
            }
            Spectrum::Spheres { radius, structure } => {
                let s = structure.map_or(1., |s| s.factor(2. * k * radius, phi));
                sphere_ft(k, radius, phi) * s
            }
        }
    }
}

/// `φ V Φ(ka)²` with `Φ` the form factor of a sphere.
fn sphere_ft(k: f64, radius: f64, frac_volume: f64) -> f64 {
    let volume = 4. / 3. * PI * radius.powi(3);
    let x = k * radius;
    // Series expansion avoids the cancellation of sin x - x cos x
    let form = if x < 1e-3 {
        1. - x * x / 10.
    } else {
        3. * (x.sin() - x * x.cos()) / x.powi(3)
    };
    frac_volume * volume * form * form
}

/// Smallest root of the Baxter equation for the stickiness `tau`.
fn baxter_lambda(frac_volume: f64, tau: f64) -> RtmResult<f64> {
    let phi = frac_volume;
    let a = phi / 12.;
    let b = tau + phi / (1. - phi);
    let c = (1. + phi / 2.) / (1. - phi).powi(2);

    let discriminant = b * b - 4. * a * c;
    if discriminant < 0. {
        return Err(RtmError::Domain {
            provider: "sticky_hard_spheres",
            quantity: "stickiness",
            value: tau,
        });
    }
    // Smallest root, written to stay finite when a -> 0
    Ok(2. * c / (b + discriminant.sqrt()))
}

fn structure_nodes() -> &'static (Vec<f64>, Vec<f64>) {
    static NODES: OnceLock<(Vec<f64>, Vec<f64>)> = OnceLock::new();
    NODES.get_or_init(|| {
        // Mapped from [-1, 1] to [0, 1]
        let (x, w) = gauss_legendre(N_STRUCTURE_NODES);
        (
            x.iter().map(|x| 0.5 * (x + 1.)).collect(),
            w.iter().map(|w| 0.5 * w).collect(),
        )
    })
}

/// Coefficients of Baxter's `Q` function for sticky hard spheres, in the
/// Percus-Yevick approximation.
#[derive(Debug, Clone, Copy, PartialEq)]
struct StickyStructure {
    a: f64,
    b: f64,
    lambda: f64,
}

impl StickyStructure {
    fn new(frac_volume: f64, tau: f64) -> RtmResult<Self> {
        let phi = frac_volume;
        let lambda = baxter_lambda(phi, tau)?;
        let mu = lambda * phi * (1. - phi);
        Ok(Self {
            a: (1. + 2. * phi - mu) / (1. - phi).powi(2),
            b: (mu - 3. * phi) / (2. * (1. - phi).powi(2)),
            lambda,
        })
    }

    /// Structure factor at `k_sigma = k σ`, σ being the sphere diameter.
    fn factor(&self, k_sigma: f64, frac_volume: f64) -> f64 {
        let (nodes, weights) = structure_nodes();
        let integral: Complex64 = nodes
            .iter()
            .zip(weights)
            .map(|(&x, &w)| {
                let q = self.a / 2. * (x * x - 1.) + self.b * (x - 1.) + self.lambda / 12.;
                w * q * Complex64::new(0., k_sigma * x).exp()
            })
            .sum();

        let q_hat = 1. - 12. * frac_volume * integral;
        1. / q_hat.norm_sqr()
    }
}
