use std::fmt::Display;

use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelInfo {
    /// Manufacturer and family
    pub man_family: Manufacturer,
    /// Manufacturer string
    pub manufacturer: String,
    /// Model string
    pub model: String,
    /// Serial number
    pub serial: Option<String>,
    /// Version number (as reported by *IDN?)
    pub version: Option<String>,
}
impl ModelInfo {
    pub fn from_idn(idn: &str) -> Result<Self> {
        let idn_sep: Vec<_> = idn.trim().split(',').map(str::trim).collect();
        if idn_sep.len() < 2 {
            return Err(Error::Parse(format!("Invalid *IDN? response: {idn}")));
        }

        Ok(Self {
            man_family: Manufacturer::from_idn(&idn_sep),
            manufacturer: idn_sep[0].to_string(),
            model: idn_sep[1].to_string(),
            serial: idn_sep.get(2).map(|s| s.to_string()),
            version: idn_sep.get(3).map(|s| s.to_string()),
        })
    }

    /// Whether this is a 3-channel DP83x supply this crate knows how to drive
    pub fn is_dp832(&self) -> bool {
        matches!(self.man_family, Manufacturer::Rigol(RigolFamily::DP800))
            && self.model.to_uppercase().starts_with("DP83")
    }
}
impl Display for ModelInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.manufacturer, self.model)?;
        if let Some(serial) = &self.serial {
            write!(f, " (S/N {serial})")?;
        }
        if let Some(version) = &self.version {
            write!(f, " fw {version}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Manufacturer {
    /// Unknown manufacturer
    Unknown,
    /// Rigol
    Rigol(RigolFamily),
}
impl Manufacturer {
    fn from_idn(idn: &[&str]) -> Self {
        let man = idn[0].to_lowercase();

        if man.contains("rigol") {
            Self::Rigol(RigolFamily::from_idn(idn))
        } else {
            Self::Unknown
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RigolFamily {
    Unknown,
    /// Rigol DP700 series power supply
    DP700,
    /// Rigol DP800 series power supply
    DP800,
    /// Rigol DP900 series power supply
    DP900,
}
impl RigolFamily {
    fn from_idn(idn: &[&str]) -> Self {
        let model = idn[1].to_lowercase();

        if model.starts_with("dp7") {
            Self::DP700
        } else if model.starts_with("dp8") {
            Self::DP800
        } else if model.starts_with("dp9") {
            Self::DP900
        } else {
            Self::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dp832_idn() {
        let info =
            ModelInfo::from_idn("RIGOL TECHNOLOGIES,DP832,DP8C123456789,00.01.14\n").unwrap();
        assert_eq!(info.man_family, Manufacturer::Rigol(RigolFamily::DP800));
        assert_eq!(info.model, "DP832");
        assert_eq!(info.serial.as_deref(), Some("DP8C123456789"));
        assert_eq!(info.version.as_deref(), Some("00.01.14"));
        assert!(info.is_dp832());
    }

    #[test]
    fn other_vendors_are_not_dp832() {
        let info = ModelInfo::from_idn("Siglent Technologies,SPD3303X,SPD3X,1.01").unwrap();
        assert_eq!(info.man_family, Manufacturer::Unknown);
        assert!(!info.is_dp832());
    }

    #[test]
    fn rejects_short_idn() {
        assert!(matches!(
            ModelInfo::from_idn("garbage"),
            Err(Error::Parse(_))
        ));
    }
}
