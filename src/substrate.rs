//! Lower boundary of a snowpack.
//!
//! A substrate reflects the down-welling intensity at the bottom of the last
//! layer back up, and emits thermally at its own temperature. Reflection is
//! expressed as an operator on the streams of the medium above, for one
//! azimuthal Fourier mode, indexed by `slot * npol + pol`.

use std::fmt::Debug;

use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;

use crate::error::{RtmError, RtmResult};
use crate::rtm::interface::{fresnel_coefficients, Specular};
use crate::rtm::streams::{MediumStreams, StreamKind};

/// A reflecting and emitting lower boundary.
pub trait Substrate: Debug + Send + Sync {
    /// Physical temperature in K.
    fn temperature(&self) -> f64;

    /// Reflection operator (square, `above.len() * npol`) for the azimuthal
    /// mode `m`.
    fn reflection(
        &self,
        frequency: f64,
        above: &MediumStreams,
        m: usize,
        npol: usize,
    ) -> RtmResult<DMatrix<f64>>;

    /// Emissivity of every stream, zero for U and for collimated streams.
    fn emissivity(&self, frequency: f64, above: &MediumStreams, npol: usize)
        -> RtmResult<DVector<f64>>;
}

fn check_temperature(provider: &'static str, temperature: f64) -> RtmResult<()> {
    if temperature.is_finite() && temperature > 0. {
        Ok(())
    } else {
        Err(RtmError::Domain {
            provider,
            quantity: "temperature",
            value: temperature,
        })
    }
}

fn check_fraction(provider: &'static str, quantity: &'static str, value: f64) -> RtmResult<()> {
    if (0. ..=1.).contains(&value) {
        Ok(())
    } else {
        Err(RtmError::Domain {
            provider,
            quantity,
            value,
        })
    }
}

/// Diagonal operator from per-stream reflection coefficients.
fn specular_reflection(
    above: &MediumStreams,
    npol: usize,
    coefficients: impl Fn(f64) -> [f64; 3],
) -> DMatrix<f64> {
    let mut diagonal = DVector::zeros(above.len() * npol);
    for (slot, &mu) in above.mu().iter().enumerate() {
        let reflection = coefficients(mu);
        for p in 0..npol {
            diagonal[slot * npol + p] = reflection[p];
        }
    }
    DMatrix::from_diagonal(&diagonal)
}

/// `1 - R` on the V and H components of the diffuse streams.
fn specular_emissivity(
    above: &MediumStreams,
    npol: usize,
    coefficients: impl Fn(f64) -> [f64; 3],
) -> DVector<f64> {
    let mut emissivity = DVector::zeros(above.len() * npol);
    for (slot, &mu) in above.mu().iter().enumerate() {
        if above.kind()[slot] == StreamKind::Collimated {
            continue;
        }
        let reflection = coefficients(mu);
        for p in 0..2 {
            emissivity[slot * npol + p] = 1. - reflection[p];
        }
    }
    emissivity
}

/// Smooth boundary with a homogeneous half-space (soil, ice, water).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Flat {
    permittivity: Complex64,
    temperature: f64,
}

impl Flat {
    /// Half-space of the given permittivity and temperature (K).
    pub fn new(permittivity: Complex64, temperature: f64) -> RtmResult<Self> {
        check_temperature("flat", temperature)?;
        Ok(Self {
            permittivity,
            temperature,
        })
    }

    fn coefficients(&self, above: Complex64) -> impl Fn(f64) -> [f64; 3] + '_ {
        move |mu| {
            let (rv, rh) = fresnel_coefficients(mu, above, self.permittivity);
            Specular::from_amplitudes(rv, rh).reflection
        }
    }
}

impl Substrate for Flat {
    fn temperature(&self) -> f64 {
        self.temperature
    }

    fn reflection(
        &self,
        _frequency: f64,
        above: &MediumStreams,
        _m: usize,
        npol: usize,
    ) -> RtmResult<DMatrix<f64>> {
        Ok(specular_reflection(above, npol, self.coefficients(above.permittivity())))
    }

    fn emissivity(
        &self,
        _frequency: f64,
        above: &MediumStreams,
        npol: usize,
    ) -> RtmResult<DVector<f64>> {
        Ok(specular_emissivity(above, npol, self.coefficients(above.permittivity())))
    }
}

/// Specular reflector with fixed, angle independent reflectivities.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reflector {
    rv: f64,
    rh: f64,
    temperature: f64,
}

impl Reflector {
    /// Reflector with reflectivities `rv` and `rh` in `[0, 1]`.
    pub fn new(rv: f64, rh: f64, temperature: f64) -> RtmResult<Self> {
        check_fraction("reflector", "rv", rv)?;
        check_fraction("reflector", "rh", rh)?;
        check_temperature("reflector", temperature)?;
        Ok(Self {
            rv,
            rh,
            temperature,
        })
    }

    fn coefficients(&self) -> [f64; 3] {
        [self.rv, self.rh, (self.rv * self.rh).sqrt()]
    }
}

impl Substrate for Reflector {
    fn temperature(&self) -> f64 {
        self.temperature
    }

    fn reflection(
        &self,
        _frequency: f64,
        above: &MediumStreams,
        _m: usize,
        npol: usize,
    ) -> RtmResult<DMatrix<f64>> {
        Ok(specular_reflection(above, npol, |_| self.coefficients()))
    }

    fn emissivity(
        &self,
        _frequency: f64,
        above: &MediumStreams,
        npol: usize,
    ) -> RtmResult<DVector<f64>> {
        Ok(specular_emissivity(above, npol, |_| self.coefficients()))
    }
}

/// Rough soil, with the Q/N/H semi-empirical model (Wang and Choudhury 1981).
///
/// The Fresnel reflectivities are mixed between polarizations by `q` and
/// attenuated by `exp(-h μ^n)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Qnh {
    permittivity: Complex64,
    q: f64,
    n: f64,
    h: f64,
    temperature: f64,
}

impl Qnh {
    /// Rough half-space of the given permittivity.
    pub fn new(permittivity: Complex64, q: f64, n: f64, h: f64, temperature: f64) -> RtmResult<Self> {
        check_fraction("qnh", "q", q)?;
        if !(h.is_finite() && h >= 0.) {
            return Err(RtmError::Domain {
                provider: "qnh",
                quantity: "h",
                value: h,
            });
        }
        check_temperature("qnh", temperature)?;
        Ok(Self {
            permittivity,
            q,
            n,
            h,
            temperature,
        })
    }

    fn coefficients(&self, above: Complex64) -> impl Fn(f64) -> [f64; 3] + '_ {
        move |mu| {
            let (rv, rh) = fresnel_coefficients(mu, above, self.permittivity);
            let attenuation = (-self.h * mu.powf(self.n)).exp();
            let (r_v, r_h) = (rv.norm_sqr(), rh.norm_sqr());
            [
                ((1. - self.q) * r_v + self.q * r_h) * attenuation,
                ((1. - self.q) * r_h + self.q * r_v) * attenuation,
                (1. - 2. * self.q) * (rv * rh.conj()).re * attenuation,
            ]
        }
    }
}

impl Substrate for Qnh {
    fn temperature(&self) -> f64 {
        self.temperature
    }

    fn reflection(
        &self,
        _frequency: f64,
        above: &MediumStreams,
        _m: usize,
        npol: usize,
    ) -> RtmResult<DMatrix<f64>> {
        Ok(specular_reflection(above, npol, self.coefficients(above.permittivity())))
    }

    fn emissivity(
        &self,
        _frequency: f64,
        above: &MediumStreams,
        npol: usize,
    ) -> RtmResult<DVector<f64>> {
        Ok(specular_emissivity(above, npol, self.coefficients(above.permittivity())))
    }
}

/// Perfectly diffuse (Lambertian) reflector of albedo `albedo`.
///
/// The reflected intensity is isotropic and unpolarized, so only the
/// azimuthally symmetric mode is non-zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lambertian {
    albedo: f64,
    temperature: f64,
}

impl Lambertian {
    /// Diffuse reflector with `albedo` in `[0, 1]`.
    pub fn new(albedo: f64, temperature: f64) -> RtmResult<Self> {
        check_fraction("lambertian", "albedo", albedo)?;
        check_temperature("lambertian", temperature)?;
        Ok(Self {
            albedo,
            temperature,
        })
    }
}

impl Substrate for Lambertian {
    fn temperature(&self) -> f64 {
        self.temperature
    }

    fn reflection(
        &self,
        _frequency: f64,
        above: &MediumStreams,
        m: usize,
        npol: usize,
    ) -> RtmResult<DMatrix<f64>> {
        let size = above.len() * npol;
        let mut reflection = DMatrix::zeros(size, size);
        if m > 0 {
            return Ok(reflection);
        }

        // Normalised with the discrete flux so that the quadrature conserves energy
        let flux: f64 = above
            .quadrature_slots()
            .map(|j| above.mu()[j] * above.weight()[j])
            .sum();
        if !(flux > 0.) {
            return Err(RtmError::config("no quadrature stream reaches the substrate"));
        }

        let column: Vec<f64> = (0..above.len())
            .map(|j| match above.kind()[j] {
                StreamKind::Quadrature => {
                    self.albedo * above.mu()[j] * above.weight()[j] / (2. * flux)
                }
                StreamKind::Observation => 0.,
                StreamKind::Collimated => self.albedo * above.mu()[j],
            })
            .collect();

        for i in 0..above.len() {
            if above.kind()[i] == StreamKind::Collimated {
                continue;
            }
            for (j, &value) in column.iter().enumerate() {
                for p in 0..2 {
                    for q in 0..2 {
                        reflection[(i * npol + p, j * npol + q)] = value;
                    }
                }
            }
        }
        Ok(reflection)
    }

    fn emissivity(
        &self,
        _frequency: f64,
        above: &MediumStreams,
        npol: usize,
    ) -> RtmResult<DVector<f64>> {
        Ok(specular_emissivity(above, npol, |_| [self.albedo; 3]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DortOptions;
    use crate::rtm::streams::StreamSet;
    use crate::sensor::SensorMode;
    use approx::assert_abs_diff_eq;

    fn air_streams(mode: SensorMode) -> MediumStreams {
        let options = DortOptions {
            n_max_stream: 8,
            ..Default::default()
        };
        StreamSet::new(&options, &[1.], &[30.], mode)
            .unwrap()
            .in_medium(Complex64::new(1., 0.))
    }

    #[test]
    fn flat_substrate_is_kirchhoff_consistent() {
        let above = air_streams(SensorMode::Passive);
        let soil = Flat::new(Complex64::new(6., 1.5), 275.).unwrap();
        let r = soil.reflection(10e9, &above, 0, 2).unwrap();
        let e = soil.emissivity(10e9, &above, 2).unwrap();
        for row in 0..above.len() * 2 {
            assert_abs_diff_eq!(r[(row, row)] + e[row], 1., epsilon = 1e-14);
        }
        assert_eq!(soil.temperature(), 275.);
    }

    #[test]
    fn reflector_cross_term() {
        let above = air_streams(SensorMode::Active);
        let reflector = Reflector::new(0.25, 0.64, 270.).unwrap();
        let r = reflector.reflection(10e9, &above, 1, 3).unwrap();
        assert_abs_diff_eq!(r[(2, 2)], 0.4, epsilon = 1e-15);
        assert!(Reflector::new(1.2, 0.5, 270.).is_err());

        // Collimated streams do not emit
        let e = reflector.emissivity(10e9, &above, 3).unwrap();
        for slot in above.slots_of(StreamKind::Collimated) {
            assert_eq!(e[slot * 3], 0.);
        }
    }

    #[test]
    fn qnh_without_roughness_is_fresnel() {
        let above = air_streams(SensorMode::Passive);
        let eps = Complex64::new(5., 0.8);
        let smooth = Qnh::new(eps, 0., 0., 0., 270.).unwrap();
        let flat = Flat::new(eps, 270.).unwrap();
        assert_eq!(
            smooth.reflection(1.4e9, &above, 0, 2).unwrap(),
            flat.reflection(1.4e9, &above, 0, 2).unwrap()
        );

        let rough = Qnh::new(eps, 0.1, 2., 0.3, 270.).unwrap();
        let r = rough.reflection(1.4e9, &above, 0, 2).unwrap();
        assert!(r[(0, 0)] < flat.reflection(1.4e9, &above, 0, 2).unwrap()[(0, 0)]);
    }

    #[test]
    fn lambertian_reflects_the_albedo() {
        let above = air_streams(SensorMode::Passive);
        let albedo = 0.4;
        let lambertian = Lambertian::new(albedo, 260.).unwrap();
        let r = lambertian.reflection(10e9, &above, 0, 2).unwrap();

        // An isotropic unpolarized down-welling intensity of one in each
        // polarization is reflected as albedo in each polarization
        let incident = DVector::from_element(above.len() * 2, 1.);
        let reflected = &r * incident;
        for slot in above.quadrature_slots() {
            assert_abs_diff_eq!(reflected[slot * 2], albedo, epsilon = 1e-12);
        }
        assert!(lambertian
            .reflection(10e9, &above, 1, 3)
            .unwrap()
            .iter()
            .all(|&v| v == 0.));
        let e = lambertian.emissivity(10e9, &above, 2).unwrap();
        assert_abs_diff_eq!(e[0], 0.6, epsilon = 1e-15);
    }
    #[test]
    fn lambertian_is_reciprocal() {
        let snow = Complex64::new(1.7, 0.);
        let options = DortOptions {
            n_max_stream: 8,
            ..Default::default()
        };
        let above = StreamSet::new(&options, &[1., snow.sqrt().re], &[30.], SensorMode::Passive)
            .unwrap()
            .in_medium(snow);
        let r = Lambertian::new(0.7, 260.).unwrap().reflection(10e9, &above, 0, 2).unwrap();

        // μᵢ wᵢ R(i ← j) = μⱼ wⱼ R(j ← i) for every pair of quadrature components
        let flux = |slot: usize| above.mu()[slot] * above.weight()[slot];
        let slots: Vec<usize> = above.quadrature_slots().collect();
        assert!(slots.windows(2).any(|pair| flux(pair[0]) != flux(pair[1])));
        for &i in &slots {
            for &j in &slots {
                for (p, q) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
                    let (a, b) = (i * 2 + p, j * 2 + q);
                    assert_abs_diff_eq!(flux(i) * r[(a, b)], flux(j) * r[(b, a)], epsilon = 1e-15);
                }
            }
        }
    }
}
