//! Sensor description and channel naming.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::{RtmError, RtmResult};

/// Speed of light in vacuum, m/s.
pub const C_SPEED: f64 = 299_792_458.;

/// Components of the modified Stokes vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Polarization {
    /// Vertical
    V,
    /// Horizontal
    H,
    /// Third Stokes component (correlation of V and H)
    U,
}

impl Polarization {
    /// Position of the component in a Stokes vector.
    pub fn index(self) -> usize {
        match self {
            Polarization::V => 0,
            Polarization::H => 1,
            Polarization::U => 2,
        }
    }
}

impl fmt::Display for Polarization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Polarization::V => "V",
            Polarization::H => "H",
            Polarization::U => "U",
        };
        f.write_str(name)
    }
}

/// Passive radiometer or active (monostatic) radar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorMode {
    /// Emission: brightness temperature
    Passive,
    /// Backscatter: backscattering coefficient
    Active,
}

/// A named channel: an observed polarization and, for active sensors, the
/// incident polarization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Name of the channel, e.g. `"VH"` or `"36V"`
    pub name: String,
    /// Observed polarization
    pub polarization: Polarization,
    /// Incident polarization, `None` for passive channels
    pub polarization_inc: Option<Polarization>,
}

/// Fixed projection of channel names onto the polarization axes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMap {
    channels: Vec<Channel>,
}

impl ChannelMap {
    /// The `V` and `H` channels of a radiometer.
    pub fn passive() -> Self {
        let mut map = Self::default();
        map.insert("V", Polarization::V, None);
        map.insert("H", Polarization::H, None);
        map
    }

    /// The four linear channels of a radar. The first letter is the incident
    /// polarization, the second the observed one.
    pub fn active() -> Self {
        use Polarization::{H, V};
        let mut map = Self::default();
        for (inc, obs) in [(V, V), (V, H), (H, V), (H, H)] {
            map.insert(&format!("{inc}{obs}"), obs, Some(inc));
        }
        map
    }

    /// Add or replace a channel.
    pub fn insert(
        &mut self,
        name: &str,
        polarization: Polarization,
        polarization_inc: Option<Polarization>,
    ) {
        self.channels.retain(|c| c.name != name);
        self.channels.push(Channel {
            name: name.to_owned(),
            polarization,
            polarization_inc,
        });
    }

    /// Look up a channel by name.
    pub fn get(&self, name: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.name == name)
    }

    /// Iterate over the channels in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }
}

/// Sensor configuration for one solve.
#[derive(Debug, Clone, PartialEq)]
pub struct Sensor {
    /// Frequency in Hz.
    frequency: f64,
    /// Observation (and, for radars, incidence) angles in degrees.
    theta_deg: SmallVec<[f64; 4]>,
    mode: SensorMode,
    channel_map: ChannelMap,
}

impl Sensor {
    /// A radiometer at `frequency` Hz looking at the angles `theta_deg`.
    pub fn passive(frequency: f64, theta_deg: &[f64]) -> RtmResult<Self> {
        Self::new(frequency, theta_deg, SensorMode::Passive, ChannelMap::passive())
    }

    /// A monostatic radar at `frequency` Hz with incidence angles `theta_deg`.
    pub fn active(frequency: f64, theta_deg: &[f64]) -> RtmResult<Self> {
        Self::new(frequency, theta_deg, SensorMode::Active, ChannelMap::active())
    }

    /// Build a sensor with an explicit channel map.
    pub fn new(
        frequency: f64,
        theta_deg: &[f64],
        mode: SensorMode,
        channel_map: ChannelMap,
    ) -> RtmResult<Self> {
        if !(frequency.is_finite() && frequency > 0.) {
            return Err(RtmError::config(format!("invalid frequency {frequency} Hz")));
        }
        if theta_deg.is_empty() {
            return Err(RtmError::config("at least one sensor angle is required"));
        }
        // Exactly 90° is grazing: no radiation leaves the surface there
        if let Some(bad) = theta_deg
            .iter()
            .find(|&&theta| !(theta.is_finite() && (0. ..90.).contains(&theta)))
        {
            return Err(RtmError::config(format!(
                "sensor angle {bad}° is not in [0°, 90°)"
            )));
        }
        Ok(Self {
            frequency,
            theta_deg: SmallVec::from_slice(theta_deg),
            mode,
            channel_map,
        })
    }

    /// A single channel of the AMSR-E radiometer, e.g. `"36V"` or `"18H"`.
    ///
    /// All AMSR-E channels look at 55° incidence.
    pub fn amsre(channel: &str) -> RtmResult<Self> {
        const FREQUENCIES: [(&str, f64); 6] = [
            ("06", 6.925e9),
            ("10", 10.65e9),
            ("18", 18.7e9),
            ("23", 23.8e9),
            ("36", 36.5e9),
            ("89", 89.0e9),
        ];
        let unknown = || RtmError::config(format!("unknown AMSR-E channel {channel}"));

        let (band, pol) = channel.split_at(channel.len().saturating_sub(1));
        let band = if band.len() == 1 { format!("0{band}") } else { band.to_owned() };
        let frequency = FREQUENCIES
            .iter()
            .find(|(name, _)| *name == band)
            .map(|&(_, f)| f)
            .ok_or_else(unknown)?;
        let polarization = match pol {
            "V" => Polarization::V,
            "H" => Polarization::H,
            _ => return Err(unknown()),
        };

        let mut map = ChannelMap::default();
        map.insert(channel, polarization, None);
        Self::new(frequency, &[55.], SensorMode::Passive, map)
    }

    /// Frequency in Hz.
    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    /// Free-space wavenumber in rad/m.
    pub fn wavenumber(&self) -> f64 {
        2. * std::f64::consts::PI * self.frequency / C_SPEED
    }

    /// Sensor angles in degrees.
    pub fn theta_deg(&self) -> &[f64] {
        &self.theta_deg
    }

    /// Passive or active.
    pub fn mode(&self) -> SensorMode {
        self.mode
    }

    /// Channel names of this sensor.
    pub fn channel_map(&self) -> &ChannelMap {
        &self.channel_map
    }
}
