//! Results of a solve: raw tensors plus the channel map of the sensor.

use std::f64::consts::PI;

use ndarray::{Array1, Array2, Array4};

use crate::error::{RtmError, RtmResult};
use crate::sensor::{ChannelMap, Polarization};

/// Convert a linear value to decibels.
pub fn to_db(value: f64) -> f64 {
    10. * value.log10()
}

fn check_angles(theta_deg: &[f64]) -> RtmResult<()> {
    if theta_deg.is_empty() {
        Err(RtmError::InconsistentInputs)
    } else {
        Ok(())
    }
}

/// Brightness temperatures of a radiometer, dimensioned as (`theta`,
/// `polarization`) with polarizations `V, H`.
#[derive(Debug, Clone, PartialEq)]
pub struct PassiveResult {
    theta_deg: Vec<f64>,
    tb: Array2<f64>,
    channel_map: ChannelMap,
}

impl PassiveResult {
    /// Wrap a `(theta, 2)` tensor of brightness temperatures in K.
    pub fn new(theta_deg: &[f64], tb: Array2<f64>, channel_map: ChannelMap) -> RtmResult<Self> {
        check_angles(theta_deg)?;
        if tb.dim() != (theta_deg.len(), 2) {
            return Err(RtmError::InconsistentInputs);
        }
        Ok(Self {
            theta_deg: theta_deg.to_vec(),
            tb,
            channel_map,
        })
    }

    /// Observation angles in degrees.
    pub fn theta_deg(&self) -> &[f64] {
        &self.theta_deg
    }

    /// The raw `(theta, polarization)` tensor.
    pub fn data(&self) -> &Array2<f64> {
        &self.tb
    }

    /// Channel names of the sensor.
    pub fn channel_map(&self) -> &ChannelMap {
        &self.channel_map
    }

    /// Brightness temperature at every angle for one polarization.
    pub fn tb(&self, polarization: Polarization) -> RtmResult<Array1<f64>> {
        match polarization {
            Polarization::U => Err(RtmError::config(
                "brightness temperatures are only computed for V and H",
            )),
            pol => Ok(self.tb.column(pol.index()).to_owned()),
        }
    }

    /// Vertically polarized brightness temperature at every angle.
    pub fn tbv(&self) -> Array1<f64> {
        self.tb.column(0).to_owned()
    }

    /// Horizontally polarized brightness temperature at every angle.
    pub fn tbh(&self) -> Array1<f64> {
        self.tb.column(1).to_owned()
    }

    /// Brightness temperature of a named channel.
    pub fn tb_channel(&self, name: &str) -> RtmResult<Array1<f64>> {
        let channel = self
            .channel_map
            .get(name)
            .ok_or_else(|| RtmError::config(format!("unknown channel {name}")))?;
        self.tb(channel.polarization)
    }
}

/// Emergent intensities of a radar per unit incident flux, dimensioned as
/// (`theta`, `polarization`, `theta_inc`, `polarization_inc`) with
/// polarizations `V, H, U`.
///
/// Entries with `theta != theta_inc` are bistatic, in the backward plane.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveResult {
    theta_deg: Vec<f64>,
    intensity: Array4<f64>,
    channel_map: ChannelMap,
}

impl ActiveResult {
    /// Wrap a `(theta, 3, theta, 3)` intensity tensor.
    pub fn new(theta_deg: &[f64], intensity: Array4<f64>, channel_map: ChannelMap) -> RtmResult<Self> {
        check_angles(theta_deg)?;
        let n = theta_deg.len();
        if intensity.dim() != (n, 3, n, 3) {
            return Err(RtmError::InconsistentInputs);
        }
        Ok(Self {
            theta_deg: theta_deg.to_vec(),
            intensity,
            channel_map,
        })
    }

    /// Incidence angles in degrees.
    pub fn theta_deg(&self) -> &[f64] {
        &self.theta_deg
    }

    /// The raw intensity tensor.
    pub fn data(&self) -> &Array4<f64> {
        &self.intensity
    }

    /// Channel names of the sensor.
    pub fn channel_map(&self) -> &ChannelMap {
        &self.channel_map
    }

    /// Bistatic coefficients `4π cos θ I`, dimensioned as (`theta`, `theta_inc`).
    pub fn bistatic_sigma(&self, polarization: Polarization, polarization_inc: Polarization) -> Array2<f64> {
        let n = self.theta_deg.len();
        Array2::from_shape_fn((n, n), |(i, j)| {
            4. * PI
                * self.theta_deg[i].to_radians().cos()
                * self.intensity[[i, polarization.index(), j, polarization_inc.index()]]
        })
    }

    /// Backscattering coefficient at every incidence angle, observing
    /// `polarization` for an incident `polarization_inc` wave.
    pub fn sigma(&self, polarization: Polarization, polarization_inc: Polarization) -> Array1<f64> {
        self.bistatic_sigma(polarization, polarization_inc).diag().to_owned()
    }

    /// [`Self::sigma`] in dB.
    pub fn sigma_db(&self, polarization: Polarization, polarization_inc: Polarization) -> Array1<f64> {
        self.sigma(polarization, polarization_inc).mapv(to_db)
    }

    /// Co-polarized vertical backscatter.
    pub fn sigma_vv(&self) -> Array1<f64> {
        self.sigma(Polarization::V, Polarization::V)
    }

    /// Vertically emitted, horizontally received backscatter.
    pub fn sigma_vh(&self) -> Array1<f64> {
        self.sigma(Polarization::H, Polarization::V)
    }

    /// Horizontally emitted, vertically received backscatter.
    pub fn sigma_hv(&self) -> Array1<f64> {
        self.sigma(Polarization::V, Polarization::H)
    }

    /// Co-polarized horizontal backscatter.
    pub fn sigma_hh(&self) -> Array1<f64> {
        self.sigma(Polarization::H, Polarization::H)
    }

    /// [`Self::sigma_vv`] in dB.
    pub fn sigma_vv_db(&self) -> Array1<f64> {
        self.sigma_vv().mapv(to_db)
    }

    /// [`Self::sigma_vh`] in dB.
    pub fn sigma_vh_db(&self) -> Array1<f64> {
        self.sigma_vh().mapv(to_db)
    }

    /// [`Self::sigma_hv`] in dB.
    pub fn sigma_hv_db(&self) -> Array1<f64> {
        self.sigma_hv().mapv(to_db)
    }

    /// [`Self::sigma_hh`] in dB.
    pub fn sigma_hh_db(&self) -> Array1<f64> {
        self.sigma_hh().mapv(to_db)
    }

    /// Backscattering coefficient of a named channel.
    pub fn sigma_channel(&self, name: &str) -> RtmResult<Array1<f64>> {
        let channel = self
            .channel_map
            .get(name)
            .ok_or_else(|| RtmError::config(format!("unknown channel {name}")))?;
        let polarization_inc = channel
            .polarization_inc
            .ok_or_else(|| RtmError::config(format!("channel {name} has no incident polarization")))?;
        Ok(self.sigma(channel.polarization, polarization_inc))
    }

    /// [`Self::sigma_channel`] in dB.
    pub fn sigma_db_channel(&self, name: &str) -> RtmResult<Array1<f64>> {
        Ok(self.sigma_channel(name)?.mapv(to_db))
    }
}

/// Output of a solve, depending on the sensor mode.
#[derive(Debug, Clone, PartialEq)]
pub enum SolveResult {
    /// Brightness temperatures
    Passive(PassiveResult),
    /// Backscatter
    Active(ActiveResult),
}

impl SolveResult {
    /// The passive result, if the sensor was a radiometer.
    pub fn passive(&self) -> Option<&PassiveResult> {
        match self {
            SolveResult::Passive(result) => Some(result),
            SolveResult::Active(_) => None,
        }
    }

    /// The active result, if the sensor was a radar.
    pub fn active(&self) -> Option<&ActiveResult> {
        match self {
            SolveResult::Active(result) => Some(result),
            SolveResult::Passive(_) => None,
        }
    }

    /// Unwrap a passive result.
    pub fn into_passive(self) -> RtmResult<PassiveResult> {
        match self {
            SolveResult::Passive(result) => Ok(result),
            SolveResult::Active(_) => Err(RtmError::config("expected a passive result")),
        }
    }

    /// Unwrap an active result.
    pub fn into_active(self) -> RtmResult<ActiveResult> {
        match self {
            SolveResult::Active(result) => Ok(result),
            SolveResult::Passive(_) => Err(RtmError::config("expected an active result")),
        }
    }
}
