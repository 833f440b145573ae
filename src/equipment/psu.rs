use std::{fmt::Display, str::FromStr};

use async_trait::async_trait;
use strum_macros::EnumString;

use crate::{
    data::{Reading, Unit},
    error::{Error, Result},
};

/// Number of output channels on the supported supply
pub const CHANNEL_COUNT: u8 = 3;

/// Validated 1-based output channel selector
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Channel(u8);
impl Channel {
    pub fn new(num: u8) -> Result<Self> {
        if (1..=CHANNEL_COUNT).contains(&num) {
            Ok(Self(num))
        } else {
            Err(Error::Validation(format!(
                "Channel {num} out of range 1..={CHANNEL_COUNT}"
            )))
        }
    }

    pub fn number(self) -> u8 {
        self.0
    }

    /// Zero-based position, for indexing per-channel arrays
    pub fn index(self) -> usize {
        usize::from(self.0 - 1)
    }

    pub fn all() -> impl Iterator<Item = Channel> {
        (1..=CHANNEL_COUNT).map(Channel)
    }
}
impl Default for Channel {
    fn default() -> Self {
        Self(1)
    }
}
impl TryFrom<u8> for Channel {
    type Error = Error;

    fn try_from(num: u8) -> Result<Self> {
        Self::new(num)
    }
}
impl Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CH{}", self.0)
    }
}

/// Boolean tokens the supply uses in replies. Matching is case-sensitive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumString)]
pub enum ScpiBool {
    #[strum(serialize = "YES")]
    Yes,
    #[strum(serialize = "NO")]
    No,
    #[strum(serialize = "ON")]
    On,
    #[strum(serialize = "OFF")]
    Off,
}
impl ScpiBool {
    pub fn value(self) -> bool {
        matches!(self, Self::Yes | Self::On)
    }

    /// Parse a raw reply line, ignoring the trailing terminator
    pub fn parse_reply(reply: &str) -> Result<bool> {
        let token = reply.trim_end();
        Self::from_str(token)
            .map(Self::value)
            .map_err(|_| Error::Parse(format!("Expected YES/NO/ON/OFF, got `{token}`")))
    }
}

/// Regulation mode reported by `:OUTPUT:MODE?`
#[derive(Clone, Debug, PartialEq, Eq, EnumString)]
pub enum OutputMode {
    #[strum(serialize = "CV")]
    ConstantVoltage,
    #[strum(serialize = "CC")]
    ConstantCurrent,
    #[strum(serialize = "UR")]
    Unregulated,
    #[strum(default)]
    Other(String),
}
impl Display for OutputMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConstantVoltage => write!(f, "CV"),
            Self::ConstantCurrent => write!(f, "CC"),
            Self::Unregulated => write!(f, "UR"),
            Self::Other(mode) => write!(f, "{mode}"),
        }
    }
}

/// Snapshot of a channel's regulation and protection flags
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelStatus {
    pub mode: OutputMode,
    pub output_on: bool,
    /// Over-current protection has tripped and latched the output off
    pub ocp_tripped: bool,
    /// Over-voltage protection has tripped and latched the output off
    pub ovp_tripped: bool,
    pub tracking: bool,
}

/// Armed state and threshold of OCP or OVP
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Protection {
    pub enabled: bool,
    pub threshold: f64,
}

/// Live reading of one channel
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Measurement {
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
}
impl Measurement {
    pub fn new(voltage: f64, current: f64, power: f64) -> Self {
        Self {
            voltage,
            current,
            power,
        }
    }

    pub fn readings(&self) -> [Reading; 3] {
        [
            Reading::new(Unit::Voltage, self.voltage),
            Reading::new(Unit::Current, self.current),
            Reading::new(Unit::Power, self.power),
        ]
    }

    pub fn get(&self, unit: Unit) -> f64 {
        match unit {
            Unit::Voltage => self.voltage,
            Unit::Current => self.current,
            Unit::Power => self.power,
        }
    }
}

/// Programmed setpoints of a channel
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChannelSetpoints {
    pub voltage: f64,
    pub current: f64,
    pub output_on: bool,
}

#[async_trait]
pub trait PowerSupplyEquipment: Send + Sync {
    /// Identification string read when the connection was opened
    fn idn(&self) -> &str;

    async fn channel_status(&mut self, chan: u8) -> Result<ChannelStatus>;

    async fn set_output(&mut self, chan: u8, on: bool) -> Result<()>;

    async fn get_output(&mut self, chan: u8) -> Result<bool>;

    async fn set_voltage(&mut self, chan: u8, voltage: f64) -> Result<()>;

    async fn get_voltage(&mut self, chan: u8) -> Result<f64>;

    async fn set_current(&mut self, chan: u8, current: f64) -> Result<()>;

    async fn get_current(&mut self, chan: u8) -> Result<f64>;

    async fn measure_voltage(&mut self, chan: u8) -> Result<f64>;

    async fn measure_current(&mut self, chan: u8) -> Result<f64>;

    async fn measure_power(&mut self, chan: u8) -> Result<f64>;

    async fn measure_all(&mut self, chan: u8) -> Result<Measurement>;

    async fn set_ocp(&mut self, chan: u8, enabled: bool, threshold: f64) -> Result<()>;

    async fn get_ocp(&mut self, chan: u8) -> Result<Protection>;

    async fn set_ovp(&mut self, chan: u8, enabled: bool, threshold: f64) -> Result<()>;

    async fn get_ovp(&mut self, chan: u8) -> Result<Protection>;

    /// Re-arm a channel after a protection trip
    async fn clear_overprotection(&mut self, chan: u8) -> Result<()>;

    async fn read_setpoints(&mut self, chan: u8) -> Result<ChannelSetpoints> {
        Ok(ChannelSetpoints {
            voltage: self.get_voltage(chan).await?,
            current: self.get_current(chan).await?,
            output_on: self.get_output(chan).await?,
        })
    }

    /// Release the transport. Calling again is a no-op.
    async fn close(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boolean_vocabulary() {
        assert!(ScpiBool::parse_reply("YES\n").unwrap());
        assert!(!ScpiBool::parse_reply("NO\n").unwrap());
        assert!(ScpiBool::parse_reply("ON\n").unwrap());
        assert!(!ScpiBool::parse_reply("OFF").unwrap());

        for bad in ["on", "Yes", "1", "TRUE", "", "ON OFF"] {
            assert!(
                matches!(ScpiBool::parse_reply(bad), Err(Error::Parse(_))),
                "`{bad}` should not parse"
            );
        }
    }

    #[test]
    fn output_mode_keeps_unknown_tokens() {
        assert_eq!("CV".parse::<OutputMode>().unwrap(), OutputMode::ConstantVoltage);
        assert_eq!("CC".parse::<OutputMode>().unwrap(), OutputMode::ConstantCurrent);
        let other = "XX".parse::<OutputMode>().unwrap();
        assert_eq!(other, OutputMode::Other("XX".into()));
        assert_eq!(other.to_string(), "XX");
    }

    #[test]
    fn channel_range() {
        assert!(matches!(Channel::new(0), Err(Error::Validation(_))));
        assert!(matches!(Channel::try_from(4), Err(Error::Validation(_))));
        assert_eq!(Channel::new(3).unwrap().to_string(), "CH3");
        assert_eq!(Channel::all().map(Channel::number).collect::<Vec<_>>(), [1, 2, 3]);
    }
}
