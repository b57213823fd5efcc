//! Angular discretisation shared by every medium of a stack.
//!
//! A stream is identified by its horizontal invariant `s = n sin θ`, which
//! Snell's law keeps constant across flat interfaces. Streams are sorted by
//! `s`, so the streams propagating in a medium of refractive index `n` (those
//! with `s < n`) are always a prefix of the full set, and a slot index means
//! the same stream in every medium.

use num_complex::Complex64;

use crate::config::{DortOptions, StreamMode};
use crate::error::{RtmError, RtmResult};
use crate::sensor::SensorMode;

/// Role of a stream in the discretisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StreamKind {
    /// Quadrature node, with a positive weight.
    Quadrature,
    /// Exact sensor angle, with zero weight: it receives radiation but does
    /// not contribute to the angular integrals.
    Observation,
    /// Carrier of the incident beam of an active sensor. It scatters into
    /// the other streams with unit weight but receives no scattered radiation.
    Collimated,
}

/// One stream of the set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stream {
    /// Horizontal invariant `n sin θ`.
    pub s: f64,
    /// Quadrature weight with respect to `s`.
    pub omega: f64,
    /// Role of the stream.
    pub kind: StreamKind,
    /// Index of the sensor angle, for observation and collimated streams.
    pub sensor_index: Option<usize>,
}

/// Gauss-Legendre nodes and weights on `[-1, 1]`, nodes in decreasing order.
pub fn gauss_legendre(n: usize) -> (Vec<f64>, Vec<f64>) {
    let mut nodes = Vec::with_capacity(n);
    let mut weights = Vec::with_capacity(n);

    // Value and derivative of P_n at x
    let legendre = |x: f64| {
        let (mut p0, mut p1) = (1., x);
        for k in 2..=n {
            let k = k as f64;
            (p0, p1) = (p1, ((2. * k - 1.) * x * p1 - (k - 1.) * p0) / k);
        }
        if n == 0 {
            (1., 0.)
        } else {
            (p1, n as f64 * (x * p1 - p0) / (x * x - 1.))
        }
    };

    for i in 1..=n {
        let mut x = (std::f64::consts::PI * (i as f64 - 0.25) / (n as f64 + 0.5)).cos();
        for _ in 0..100 {
            let (p, dp) = legendre(x);
            let dx = p / dp;
            x -= dx;
            if dx.abs() < 1e-15 {
                break;
            }
        }
        let (_, dp) = legendre(x);
        nodes.push(x);
        weights.push(2. / ((1. - x * x) * dp * dp));
    }
    (nodes, weights)
}

/// `n` Gauss-Legendre nodes and weights on `(0, top)`.
fn gauss_on(n: usize, top: f64) -> impl Iterator<Item = (f64, f64)> {
    let (x, w) = gauss_legendre(n);
    x.into_iter()
        .zip(w)
        .map(move |(x, w)| (0.5 * top * (x + 1.), 0.5 * top * w))
}

/// Split `total` nodes among segments in proportion to `spans`, at least one
/// node per segment.
fn allocate(total: usize, spans: &[f64]) -> Vec<usize> {
    let sum: f64 = spans.iter().sum();
    let share = |k: usize| total as f64 * spans[k] / sum;
    let mut counts: Vec<usize> = (0..spans.len()).map(|k| (share(k) as usize).max(1)).collect();
    while counts.iter().sum::<usize>() < total {
        let k = (0..spans.len())
            .max_by(|&a, &b| (share(a) - counts[a] as f64).total_cmp(&(share(b) - counts[b] as f64)))
            .unwrap_or(0);
        counts[k] += 1;
    }
    counts
}

/// Real refractive index of a medium.
pub fn refractive_index(permittivity: Complex64) -> f64 {
    permittivity.sqrt().re
}

/// The streams of one solve, sorted by increasing `s`.
#[derive(Debug, Clone)]
pub struct StreamSet {
    streams: Vec<Stream>,
}

impl StreamSet {
    /// Build the stream set for a stack made of media with the given real
    /// refractive indices (air is always included).
    ///
    /// The range of `s` is cut at every refractive index of the stack, so
    /// each medium sees whole segments and the critical angles of all
    /// interfaces fall between streams. A segment `[lo, hi]` carries a
    /// Gauss-Legendre rule in `μ` of the medium of index `hi`, where the
    /// segment reaches grazing incidence.
    pub fn new(
        options: &DortOptions,
        indices: &[f64],
        theta_deg: &[f64],
        mode: SensorMode,
    ) -> RtmResult<Self> {
        if options.n_max_stream == 0 {
            return Err(RtmError::config("n_max_stream must be positive"));
        }
        let mut bounds: Vec<f64> = indices.iter().map(|&n| n.max(1.)).collect();
        bounds.push(1.);
        bounds.sort_by(f64::total_cmp);
        bounds.dedup();
        let n_max = bounds[bounds.len() - 1];
        let lower: Vec<f64> = std::iter::once(0.).chain(bounds[..bounds.len() - 1].iter().copied()).collect();

        // Extent of each segment in μ of the most refringent medium
        let mu_max = |s: f64| (1. - (s / n_max).powi(2)).max(0.).sqrt();
        let spans: Vec<f64> = lower.iter().zip(&bounds).map(|(&lo, &hi)| mu_max(lo) - mu_max(hi)).collect();
        let counts = match options.stream_mode {
            StreamMode::MostRefringent => allocate(options.n_max_stream, &spans),
            StreamMode::Air => std::iter::once(options.n_max_stream)
                .chain(match spans.len() {
                    1 => Vec::new(),
                    _ => allocate(options.n_evanescent_stream.max(1), &spans[1..]),
                })
                .collect(),
        };

        let mut streams = Vec::with_capacity(counts.iter().sum::<usize>() + 2 * theta_deg.len());
        for ((&lo, &hi), &count) in lower.iter().zip(&bounds).zip(&counts) {
            let top = (1. - (lo / hi).powi(2)).sqrt();
            for (mu, w) in gauss_on(count, top) {
                let s = hi * (1. - mu * mu).sqrt();
                streams.push(Stream {
                    s,
                    omega: w * hi * hi * mu / s,
                    kind: StreamKind::Quadrature,
                    sensor_index: None,
                });
            }
        }

        for (index, &theta) in theta_deg.iter().enumerate() {
            if !(theta.is_finite() && (0. ..90.).contains(&theta)) {
                return Err(RtmError::config(format!(
                    "sensor angle {theta}° is not in [0°, 90°)"
                )));
            }
            // Repeated angles share the streams of their first occurrence
            if theta_deg[..index].contains(&theta) {
                continue;
            }
            let s = theta.to_radians().sin();
            let mut sensor_stream = |kind| {
                streams.push(Stream {
                    s,
                    omega: 0.,
                    kind,
                    sensor_index: Some(index),
                })
            };
            sensor_stream(StreamKind::Observation);
            if mode == SensorMode::Active {
                sensor_stream(StreamKind::Collimated);
            }
        }

        streams.sort_by(|a, b| a.s.total_cmp(&b.s).then(a.kind.cmp(&b.kind)));
        Ok(Self { streams })
    }

    /// All streams, by increasing `s`.
    pub fn streams(&self) -> &[Stream] {
        &self.streams
    }

    /// Position of the stream of `kind` that carries sensor angle `index` of
    /// `theta_deg`.
    pub fn sensor_slot(&self, theta_deg: &[f64], index: usize, kind: StreamKind) -> Option<usize> {
        let target = *theta_deg.get(index)?;
        let first = theta_deg.iter().position(|&t| t == target)?;
        self.streams
            .iter()
            .position(|s| s.kind == kind && s.sensor_index == Some(first))
    }

    /// The streams propagating in a medium of the given permittivity, whose
    /// refractive index should be one of those the set was built for.
    pub fn in_medium(&self, permittivity: Complex64) -> MediumStreams {
        let n = refractive_index(permittivity);
        let count = self.streams.partition_point(|stream| stream.s < n);
        let streams = &self.streams[..count];

        let mu: Vec<f64> = streams
            .iter()
            .map(|stream| (1. - (stream.s / n).powi(2)).sqrt())
            .collect();
        let weight = streams
            .iter()
            .zip(&mu)
            .map(|(stream, &mu)| match stream.kind {
                StreamKind::Quadrature => stream.s * stream.omega / (n * n * mu),
                StreamKind::Observation => 0.,
                StreamKind::Collimated => 1.,
            })
            .collect();

        MediumStreams {
            n,
            permittivity,
            mu,
            weight,
            kind: streams.iter().map(|stream| stream.kind).collect(),
        }
    }
}

/// The streams seen by one medium.
#[derive(Debug, Clone, PartialEq)]
pub struct MediumStreams {
    n: f64,
    permittivity: Complex64,
    mu: Vec<f64>,
    weight: Vec<f64>,
    kind: Vec<StreamKind>,
}

impl MediumStreams {
    /// Number of streams (slots).
    pub fn len(&self) -> usize {
        self.mu.len()
    }

    /// True when no stream propagates in the medium.
    pub fn is_empty(&self) -> bool {
        self.mu.is_empty()
    }

    /// Real refractive index of the medium.
    pub fn n(&self) -> f64 {
        self.n
    }

    /// Permittivity of the medium.
    pub fn permittivity(&self) -> Complex64 {
        self.permittivity
    }

    /// Cosines of the streams, decreasing.
    pub fn mu(&self) -> &[f64] {
        &self.mu
    }

    /// Weight of each stream in the angular integrals over `μ`. Observation
    /// streams weigh zero and collimated streams one.
    pub fn weight(&self) -> &[f64] {
        &self.weight
    }

    /// Role of each stream.
    pub fn kind(&self) -> &[StreamKind] {
        &self.kind
    }

    /// Slots of the quadrature streams.
    pub fn quadrature_slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots_of(StreamKind::Quadrature)
    }

    /// Slots of the streams of one kind.
    pub fn slots_of(&self, kind: StreamKind) -> impl Iterator<Item = usize> + '_ {
        self.kind
            .iter()
            .enumerate()
            .filter(move |(_, &k)| k == kind)
            .map(|(slot, _)| slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn options(mode: StreamMode) -> DortOptions {
        DortOptions {
            n_max_stream: 8,
            n_evanescent_stream: 4,
            stream_mode: mode,
            ..Default::default()
        }
    }

    #[test]
    fn gauss_legendre_integrates_polynomials() {
        let (x, w) = gauss_legendre(5);
        assert_abs_diff_eq!(w.iter().sum::<f64>(), 2., epsilon = 1e-14);
        let int_x8: f64 = x.iter().zip(&w).map(|(x, w)| w * x.powi(8)).sum();
        assert_abs_diff_eq!(int_x8, 2. / 9., epsilon = 1e-14);
        assert!(x.windows(2).all(|p| p[0] > p[1]));
    }

    #[test]
    fn reference_medium_weights_sum_to_one() {
        let eps = Complex64::new(1.8, 0.);
        let n = refractive_index(eps);
        let set = StreamSet::new(&options(StreamMode::MostRefringent), &[n], &[40.], SensorMode::Passive)
            .unwrap();
        let medium = set.in_medium(eps);
        assert_eq!(medium.len(), 9);
        assert_abs_diff_eq!(medium.weight().iter().sum::<f64>(), 1., epsilon = 1e-4);
        assert!(medium.mu().windows(2).all(|p| p[0] >= p[1]));

        // The observation stream has zero weight and exactly the sensor angle in air
        let air = set.in_medium(Complex64::new(1., 0.));
        let slot = set.sensor_slot(&[40.], 0, StreamKind::Observation).unwrap();
        assert_eq!(air.kind()[slot], StreamKind::Observation);
        assert_eq!(air.weight()[slot], 0.);
        assert_abs_diff_eq!(air.mu()[slot], 40f64.to_radians().cos(), epsilon = 1e-15);
    }

    #[test]
    fn flux_invariant_across_media() {
        let eps = Complex64::new(2.5, 0.);
        let set = StreamSet::new(
            &options(StreamMode::MostRefringent),
            &[refractive_index(eps)],
            &[30.],
            SensorMode::Passive,
        )
        .unwrap();
        let dense = set.in_medium(eps);
        let air = set.in_medium(Complex64::new(1., 0.));
        assert!(air.len() < dense.len());
        for slot in air.quadrature_slots() {
            let in_air = air.weight()[slot] * air.mu()[slot];
            let in_dense = dense.n().powi(2) * dense.weight()[slot] * dense.mu()[slot];
            assert_abs_diff_eq!(in_air, in_dense, epsilon = 1e-12);
        }
    }

    #[test]
    fn air_mode_adds_evanescent_streams() {
        let eps = Complex64::new(2., 0.);
        let set =
            StreamSet::new(&options(StreamMode::Air), &[refractive_index(eps)], &[55.], SensorMode::Active)
                .unwrap();
        let air = set.in_medium(Complex64::new(1., 0.));
        let dense = set.in_medium(eps);
        assert_eq!(air.len(), 8 + 2);
        assert_eq!(dense.len(), 8 + 4 + 2);
        assert_abs_diff_eq!(
            air.quadrature_slots().map(|s| air.weight()[s]).sum::<f64>(),
            1.,
            epsilon = 1e-12
        );
        assert_eq!(air.slots_of(StreamKind::Collimated).count(), 1);
    }

    #[test]
    fn grazing_sensor_is_a_configuration_error() {
        let err = StreamSet::new(&DortOptions::default(), &[1.3], &[90.], SensorMode::Passive)
            .unwrap_err();
        assert!(matches!(err, RtmError::Configuration(_)));
    }

    #[test]
    fn repeated_angles_share_streams() {
        let theta = [30., 50., 30.];
        let set =
            StreamSet::new(&options(StreamMode::MostRefringent), &[1.2], &theta, SensorMode::Active)
                .unwrap();
        let obs = |i| set.sensor_slot(&theta, i, StreamKind::Observation);
        assert_eq!(obs(0), obs(2));
        assert_ne!(obs(0), obs(1));
        assert!(set.sensor_slot(&theta, 3, StreamKind::Observation).is_none());
        let inc = |i| set.sensor_slot(&theta, i, StreamKind::Collimated);
        assert_eq!(inc(2), inc(0));
        assert_ne!(inc(2), obs(2));
    }

    #[test]
    fn critical_angles_fall_between_streams() {
        let light = Complex64::new(1.6, 0.);
        let dense = Complex64::new(2.2, 0.);
        let indices = [refractive_index(light), refractive_index(dense)];
        for mode in [StreamMode::MostRefringent, StreamMode::Air] {
            let options = DortOptions {
                n_max_stream: 16,
                n_evanescent_stream: 8,
                stream_mode: mode,
                ..Default::default()
            };
            let set = StreamSet::new(&options, &indices, &[50.], SensorMode::Passive).unwrap();
            let media = [Complex64::new(1., 0.), light, dense].map(|eps| set.in_medium(eps));

            // The grazing segment of each medium is a Gauss rule in its own μ
            for medium in &media {
                let weights: Vec<f64> = medium.quadrature_slots().map(|s| medium.weight()[s]).collect();
                assert_abs_diff_eq!(weights.iter().sum::<f64>(), 1., epsilon = 1e-3);
                assert!(weights.iter().all(|&w| w > 0. && w < 0.4), "{weights:?}");
                let grazing = medium.mu()[medium.len() - 1];
                assert!(grazing > 0. && grazing < 0.2);
            }
            assert!(media[0].len() < media[1].len() && media[1].len() < media[2].len());
        }
    }
}
