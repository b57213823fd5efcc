//! Solver options.
//!
//! Options can be built in code (starting from [`DortOptions::default`]) or
//! parsed from a TOML string, where every key is optional:
//!
//! ```toml
//! n_max_stream = 32
//! m_max = 2
//! stream_mode = "most_refringent"
//! phase_normalization = true
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{RtmError, RtmResult};

/// How the angular quadrature is laid out across the media of the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamMode {
    /// Gauss-Legendre quadrature in the most refringent layer, mapped to the
    /// other media with Snell's law.
    MostRefringent,
    /// Gauss-Legendre quadrature in air for the propagating streams, plus a
    /// separate Gauss-Legendre set for the streams trapped by total internal
    /// reflection.
    Air,
}

/// Options of the discrete-ordinate solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DortOptions {
    /// Number of quadrature streams per hemisphere in the reference medium.
    pub n_max_stream: usize,
    /// Number of evanescent (totally reflected) streams, only for [`StreamMode::Air`].
    pub n_evanescent_stream: usize,
    /// Highest azimuthal Fourier mode used by active sensors.
    pub m_max: usize,
    /// Quadrature layout.
    pub stream_mode: StreamMode,
    /// Rescale the discrete phase operator so that every stream scatters `ks`.
    pub phase_normalization: bool,
    /// Number of azimuth samples used to Fourier-decompose phase matrices.
    pub n_azimuth: usize,
    /// Smallest accepted ratio between the smallest and largest LU pivots of a
    /// block of the stack system.
    pub condition_limit: f64,
    /// Largest accepted relative asymmetry of the symmetrised phase operator.
    pub reciprocity_tolerance: f64,
    /// Maximum number of iterations of the symmetric eigen-solver (0 = until convergence).
    pub max_eigen_iterations: usize,
}

impl Default for DortOptions {
    fn default() -> Self {
        Self {
            n_max_stream: 32,
            n_evanescent_stream: 8,
            m_max: 2,
            stream_mode: StreamMode::MostRefringent,
            phase_normalization: true,
            n_azimuth: 64,
            condition_limit: 1e-14,
            reciprocity_tolerance: 1e-6,
            max_eigen_iterations: 0,
        }
    }
}

impl DortOptions {
    /// Parse options from a TOML document. Missing keys take their default.
    pub fn from_toml_str(text: &str) -> RtmResult<Self> {
        let options: Self = toml::from_str(text).map_err(|e| RtmError::config(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Check that the options describe a usable discretisation.
    pub fn validate(&self) -> RtmResult<()> {
        if self.n_max_stream == 0 {
            return Err(RtmError::config("n_max_stream must be positive"));
        }
        if self.stream_mode == StreamMode::Air && self.n_evanescent_stream == 0 {
            return Err(RtmError::config(
                "n_evanescent_stream must be positive with the air stream mode",
            ));
        }
        // The azimuth samples must resolve cos(m_max φ) without aliasing
        if self.n_azimuth < 2 * self.m_max + 2 {
            return Err(RtmError::config(format!(
                "n_azimuth = {} is too small for m_max = {}",
                self.n_azimuth, self.m_max
            )));
        }
        if !(self.condition_limit > 0. && self.condition_limit < 1.) {
            return Err(RtmError::config("condition_limit must be in (0, 1)"));
        }
        if !(self.reciprocity_tolerance > 0.) {
            return Err(RtmError::config("reciprocity_tolerance must be positive"));
        }
        Ok(())
    }
}
