use std::fmt::Display;

use strum_macros::EnumIter;

fn get_prefix_and_scale(val: f64) -> (&'static str, f64) {
    let aval = val.abs();
    if aval == 0.0 {
        ("", val)
    } else if aval < 1e-6 {
        ("n", val / 1e-9)
    } else if aval < 1e-3 {
        ("u", val / 1e-6)
    } else if aval < 1e0 {
        ("m", val / 1e-3)
    } else if aval < 1e3 {
        ("", val)
    } else {
        ("k", val / 1e3)
    }
}

/// Quantities reported by a supply channel, in `:MEAS:ALL?` order
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter)]
pub enum Unit {
    /// Voltage - volts
    Voltage,
    /// Current - amps
    Current,
    /// Power - watts
    Power,
}
impl Unit {
    pub fn unit_abbrev(&self) -> &'static str {
        match self {
            Self::Voltage => "V",
            Self::Current => "A",
            Self::Power => "W",
        }
    }

    /// Column suffix used in the history table header (`CH1_V`, `CH1_I`, ...)
    pub fn column_suffix(&self) -> &'static str {
        match self {
            Self::Voltage => "V",
            Self::Current => "I",
            Self::Power => "P",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Reading {
    pub unit: Unit,
    pub value: f64,
}
impl Reading {
    pub fn new(unit: Unit, value: f64) -> Self {
        Self { unit, value }
    }
}
impl Display for Reading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = if self.value.is_nan() {
            format!("OVERLOAD {}", self.unit.unit_abbrev())
        } else {
            let (prefix, value) = get_prefix_and_scale(self.value);

            format!("{:.3} {}{}", value, prefix, self.unit.unit_abbrev())
        };
        // Pad so readings line up in tables
        f.pad(&text)
    }
}
