//! Electromagnetic models: from a layer description to its scattering and
//! absorption coefficients and its phase matrix.
//!
//! A [`ScatteringModel`] is chosen per layer when the layer is built. At solve
//! time it is evaluated at the sensor frequency into a [`LayerOptics`], which
//! is what the solver consumes.
//!
//! Phase matrices are expressed in the modified Stokes basis `(V, H, U)`. The
//! cosines `mu_s` and `mu_i` are signed, positive for up-going directions, and
//! `dphi` is the azimuth of the scattered direction minus the azimuth of the
//! incident one.

use std::f64::consts::PI;
use std::fmt::Debug;
use std::sync::OnceLock;

use log::debug;
use nalgebra::Matrix3;
use num_complex::Complex64;

use crate::error::{RtmError, RtmResult};
use crate::microstructure::Autocorrelation;
use crate::permittivity::PermittivityCache;
use crate::rtm::streams::gauss_legendre;
use crate::sensor::C_SPEED;
use crate::snowpack::Layer;

/// Number of Gauss-Legendre nodes for the IBA scattering integral.
const N_IBA_NODES: usize = 64;

/// Optical properties of one layer at one frequency.
pub trait LayerOptics: Debug + Send + Sync {
    /// Effective permittivity of the medium.
    fn effective_permittivity(&self) -> Complex64;

    /// Scattering coefficient in 1/m.
    fn ks(&self) -> f64;

    /// Absorption coefficient in 1/m.
    fn ka(&self) -> f64;

    /// Extinction coefficient in 1/m.
    fn ke(&self) -> f64 {
        self.ks() + self.ka()
    }

    /// Phase matrix for scattering from direction `(mu_i, 0)` into
    /// `(mu_s, dphi)`, per steradian.
    fn phase(&self, mu_s: f64, mu_i: f64, dphi: f64) -> Matrix3<f64>;
}

/// A scattering theory, selected per layer.
pub trait ScatteringModel: Debug + Send + Sync {
    /// Name of the theory, for diagnostics.
    fn name(&self) -> &'static str;

    /// Evaluate the optical properties of `layer` at `frequency` (Hz).
    fn optics(
        &self,
        frequency: f64,
        layer: &Layer,
        cache: &mut PermittivityCache,
    ) -> RtmResult<Box<dyn LayerOptics>>;
}

/// Scattering amplitude matrix of an electric dipole turned into a Stokes
/// matrix. Its `V + H` response integrates to `8π/3` over the sphere.
pub fn dipole_stokes(mu_s: f64, mu_i: f64, dphi: f64) -> Matrix3<f64> {
    let sin_s = (1. - mu_s * mu_s).max(0.).sqrt();
    let sin_i = (1. - mu_i * mu_i).max(0.).sqrt();
    let (sin_d, cos_d) = dphi.sin_cos();

    let f_vv = mu_s * mu_i * cos_d + sin_s * sin_i;
    let f_vh = mu_s * sin_d;
    let f_hv = -mu_i * sin_d;
    let f_hh = cos_d;

    Matrix3::new(
        f_vv * f_vv,
        f_vh * f_vh,
        f_vv * f_vh,
        f_hv * f_hv,
        f_hh * f_hh,
        f_hv * f_hh,
        2. * f_vv * f_hv,
        2. * f_vh * f_hh,
        f_vv * f_hh + f_vh * f_hv,
    )
}

/// Cosine of the scattering angle between two directions.
fn cos_scattering_angle(mu_s: f64, mu_i: f64, dphi: f64) -> f64 {
    let sin_s = (1. - mu_s * mu_s).max(0.).sqrt();
    let sin_i = (1. - mu_i * mu_i).max(0.).sqrt();
    (mu_s * mu_i + sin_s * sin_i * dphi.cos()).clamp(-1., 1.)
}

fn free_space_wavenumber(frequency: f64) -> f64 {
    2. * PI * frequency / C_SPEED
}

/// Angular distribution of a [`Prescribed`] layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseShape {
    /// Same intensity in every direction, depolarizing.
    Isotropic,
    /// Dipole pattern.
    Rayleigh,
}

impl PhaseShape {
    fn phase(self, ks: f64, mu_s: f64, mu_i: f64, dphi: f64) -> Matrix3<f64> {
        match self {
            PhaseShape::Isotropic => {
                let p = ks / (8. * PI);
                Matrix3::new(p, p, 0., p, p, 0., 0., 0., 0.)
            }
            PhaseShape::Rayleigh => dipole_stokes(mu_s, mu_i, dphi) * (3. * ks / (8. * PI)),
        }
    }
}

/// Optics given directly by the caller, for idealized media and tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prescribed {
    /// Scattering coefficient in 1/m
    pub ks: f64,
    /// Absorption coefficient in 1/m
    pub ka: f64,
    /// Permittivity of the medium
    pub permittivity: Complex64,
    /// Angular distribution of the scattered intensity
    pub shape: PhaseShape,
}

impl Prescribed {
    /// A medium that absorbs but does not scatter.
    pub fn absorbing(ka: f64, permittivity: Complex64) -> Self {
        Self {
            ks: 0.,
            ka,
            permittivity,
            shape: PhaseShape::Isotropic,
        }
    }
}

impl ScatteringModel for Prescribed {
    fn name(&self) -> &'static str {
        "prescribed"
    }

    fn optics(
        &self,
        _frequency: f64,
        _layer: &Layer,
        _cache: &mut PermittivityCache,
    ) -> RtmResult<Box<dyn LayerOptics>> {
        for (quantity, value) in [("ks", self.ks), ("ka", self.ka)] {
            if !(value.is_finite() && value >= 0.) {
                return Err(RtmError::Domain {
                    provider: "prescribed",
                    quantity,
                    value,
                });
            }
        }
        Ok(Box::new(*self))
    }
}

impl LayerOptics for Prescribed {
    fn effective_permittivity(&self) -> Complex64 {
        self.permittivity
    }

    fn ks(&self) -> f64 {
        self.ks
    }

    fn ka(&self) -> f64 {
        self.ka
    }

    fn phase(&self, mu_s: f64, mu_i: f64, dphi: f64) -> Matrix3<f64> {
        self.shape.phase(self.ks, mu_s, mu_i, dphi)
    }
}

/// Absorbing homogeneous medium with the mixture's effective permittivity.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonScattering;

impl ScatteringModel for NonScattering {
    fn name(&self) -> &'static str {
        "nonscattering"
    }

    fn optics(
        &self,
        frequency: f64,
        layer: &Layer,
        cache: &mut PermittivityCache,
    ) -> RtmResult<Box<dyn LayerOptics>> {
        let eps_eff = layer.effective_permittivity(frequency, cache)?;
        let ka = 2. * free_space_wavenumber(frequency) * eps_eff.sqrt().im;
        Ok(Box::new(Prescribed::absorbing(ka, eps_eff)))
    }
}

/// Independent small spheres (Rayleigh regime) in a background medium.
#[derive(Debug, Clone, Copy, Default)]
pub struct Rayleigh;

impl ScatteringModel for Rayleigh {
    fn name(&self) -> &'static str {
        "rayleigh"
    }

    fn optics(
        &self,
        frequency: f64,
        layer: &Layer,
        cache: &mut PermittivityCache,
    ) -> RtmResult<Box<dyn LayerOptics>> {
        let radius = layer.microstructure().and_then(|m| m.radius()).ok_or_else(|| {
            RtmError::config("the Rayleigh model needs a microstructure made of spheres")
        })?;
        let (e0, eps) = layer.permittivities(frequency, cache)?;
        let f = layer.frac_volume();
        let k0 = free_space_wavenumber(frequency);

        let y = (eps - e0) / (eps + 2. * e0);
        let ks = 2. * f * k0.powi(4) * radius.powi(3) * y.norm_sqr() * e0.re * e0.re;
        let ka = f * 9. * k0 * eps.im / e0.re * (e0 / (eps + 2. * e0)).norm_sqr()
            + (1. - f) * e0.im * k0;

        Ok(Box::new(Prescribed {
            ks,
            ka,
            permittivity: layer.effective_permittivity(frequency, cache)?,
            shape: PhaseShape::Rayleigh,
        }))
    }
}

/// Improved Born approximation (Mätzler 1998), valid for any microstructure
/// with a known autocorrelation function.
#[derive(Debug, Clone, Copy, Default)]
pub struct Iba;

/// A layer evaluated with [`Iba`].
#[derive(Debug, Clone)]
struct IbaOptics {
    eps_eff: Complex64,
    ks: f64,
    ka: f64,
    /// `k0⁴ |Δε|² y² / (16π²)`
    prefactor: f64,
    /// Wavenumber in the effective medium
    k_eff: f64,
    autocorrelation: Autocorrelation,
}

fn iba_nodes() -> &'static (Vec<f64>, Vec<f64>) {
    static NODES: OnceLock<(Vec<f64>, Vec<f64>)> = OnceLock::new();
    NODES.get_or_init(|| gauss_legendre(N_IBA_NODES))
}

impl IbaOptics {
    /// Correlation spectrum at the momentum transfer of a scattering angle.
    fn spectrum(&self, cos_theta: f64) -> f64 {
        let k_diff = self.k_eff * (2. - 2. * cos_theta).max(0.).sqrt();
        self.autocorrelation.ft(k_diff)
    }
}

impl ScatteringModel for Iba {
    fn name(&self) -> &'static str {
        "iba"
    }

    fn optics(
        &self,
        frequency: f64,
        layer: &Layer,
        cache: &mut PermittivityCache,
    ) -> RtmResult<Box<dyn LayerOptics>> {
        let autocorrelation = layer
            .microstructure()
            .ok_or_else(|| RtmError::config("the IBA model needs a microstructure"))?
            .autocorrelation(layer.frac_volume())?;

        let (e0, eps) = layer.permittivities(frequency, cache)?;
        let eps_eff = layer.effective_permittivity(frequency, cache)?;
        let k0 = free_space_wavenumber(frequency);

        let y2 = (3. * eps_eff / (eps + 2. * eps_eff)).norm_sqr();
        let prefactor = k0.powi(4) / (16. * PI * PI) * (eps - e0).norm_sqr() * y2;

        let mut optics = IbaOptics {
            eps_eff,
            ks: 0.,
            ka: 2. * k0 * eps_eff.sqrt().im,
            prefactor,
            k_eff: k0 * eps_eff.re.sqrt(),
            autocorrelation,
        };

        // Total scattering, averaged over the incident polarization
        let (nodes, weights) = iba_nodes();
        let mut integral = 0.;
        for (&mu, &w) in nodes.iter().zip(weights) {
            integral += w * optics.spectrum(mu) * PI * (1. + mu * mu);
        }
        optics.ks = prefactor * integral;

        debug!(
            "iba: ks = {:.4e} 1/m, ka = {:.4e} 1/m, eps_eff = {:.4}",
            optics.ks, optics.ka, eps_eff
        );
        Ok(Box::new(optics))
    }
}

impl LayerOptics for IbaOptics {
    fn effective_permittivity(&self) -> Complex64 {
        self.eps_eff
    }

    fn ks(&self) -> f64 {
        self.ks
    }

    fn ka(&self) -> f64 {
        self.ka
    }

    fn phase(&self, mu_s: f64, mu_i: f64, dphi: f64) -> Matrix3<f64> {
        let spectrum = self.spectrum(cos_scattering_angle(mu_s, mu_i, dphi));
        dipole_stokes(mu_s, mu_i, dphi) * (self.prefactor * spectrum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::microstructure::Microstructure;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use std::sync::Arc;

    /// Integrate the total scattered V + H intensity for an incident stokes vector.
    fn total_scattering(optics: &dyn LayerOptics, mu_i: f64, incident: usize) -> f64 {
        let (x, w) = gauss_legendre(48);
        let n_phi = 96;
        let mut total = 0.;
        for (&mu_s, &w_mu) in x.iter().zip(&w) {
            for k in 0..n_phi {
                let dphi = 2. * PI * k as f64 / n_phi as f64;
                let p = optics.phase(mu_s, mu_i, dphi);
                total += w_mu * 2. * PI / n_phi as f64 * (p[(0, incident)] + p[(1, incident)]);
            }
        }
        total
    }

    #[test]
    fn dipole_backscatter_and_forward() {
        // Backscatter of a V wave at normal incidence keeps the polarization
        let p = dipole_stokes(1., -1., PI);
        assert_abs_diff_eq!(p[(0, 0)], 1., epsilon = 1e-12);
        assert_abs_diff_eq!(p[(1, 0)], 0., epsilon = 1e-12);
        assert_abs_diff_eq!(p[(1, 1)], 1., epsilon = 1e-12);
        assert_abs_diff_eq!(p[(2, 2)], -1., epsilon = 1e-12);
    }

    #[test]
    fn prescribed_phase_integrates_to_ks() {
        for shape in [PhaseShape::Isotropic, PhaseShape::Rayleigh] {
            let optics = Prescribed {
                ks: 2.5,
                ka: 0.1,
                permittivity: Complex64::new(1.5, 0.),
                shape,
            };
            for incident in [0, 1] {
                let total = total_scattering(&optics, -0.6, incident);
                assert_relative_eq!(total, 2.5, max_relative = 1e-6);
            }
            assert_relative_eq!(optics.ke(), 2.6);
        }
    }

    #[test]
    fn iba_phase_integrates_to_ks() {
        let layer = Layer::snow(
            1.,
            260.,
            300.,
            Microstructure::Exponential { corr_length: 1e-4 },
            Arc::new(Iba),
        )
        .unwrap();
        let mut cache = PermittivityCache::new();
        let optics = Iba.optics(37e9, &layer, &mut cache).unwrap();
        assert!(optics.ks() > 0. && optics.ka() > 0.);

        let total_v = total_scattering(optics.as_ref(), -0.7, 0);
        let total_h = total_scattering(optics.as_ref(), -0.7, 1);
        assert_relative_eq!(0.5 * (total_v + total_h), optics.ks(), max_relative = 2e-2);
    }

    #[test]
    fn iba_checks_the_microstructure_once() {
        let snow = |stickiness| {
            Layer::snow(
                1.,
                260.,
                300.,
                Microstructure::StickyHardSpheres {
                    radius: 2e-4,
                    stickiness,
                },
                Arc::new(Iba),
            )
            .unwrap()
        };
        let mut cache = PermittivityCache::new();
        // No real Baxter root at this density
        let err = Iba.optics(37e9, &snow(1e-4), &mut cache).unwrap_err();
        assert!(matches!(err, RtmError::Domain { quantity: "stickiness", .. }));

        let optics = Iba.optics(37e9, &snow(0.2), &mut cache).unwrap();
        let total_v = total_scattering(optics.as_ref(), -0.7, 0);
        let total_h = total_scattering(optics.as_ref(), -0.7, 1);
        assert_relative_eq!(0.5 * (total_v + total_h), optics.ks(), max_relative = 2e-2);
    }

    #[test]
    fn rayleigh_needs_spheres() {
        let layer = Layer::snow(
            1.,
            260.,
            300.,
            Microstructure::Exponential { corr_length: 1e-4 },
            Arc::new(Rayleigh),
        )
        .unwrap();
        let mut cache = PermittivityCache::new();
        assert!(Rayleigh.optics(10e9, &layer, &mut cache).is_err());
    }

    #[test]
    fn non_scattering_absorbs() {
        let layer = Layer::snow(
            1.,
            260.,
            300.,
            Microstructure::IndependentSphere { radius: 2e-4 },
            Arc::new(NonScattering),
        )
        .unwrap();
        let mut cache = PermittivityCache::new();
        let optics = NonScattering.optics(19e9, &layer, &mut cache).unwrap();
        assert_eq!(optics.ks(), 0.);
        assert!(optics.ka() > 0.);
        assert!(optics.effective_permittivity().re > 1.);
    }
}
