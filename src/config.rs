use std::{path::Path, path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::{
    equipment::psu::Channel,
    error::{Error, Result},
    monitor::MonitorConfig,
    session::SessionOptions,
};

/// Settings shared by the CLI subcommands, loadable from a TOML file
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Bound on connecting and on each reply
    pub timeout_ms: u64,
    pub sample_interval_ms: u64,
    pub plot_interval_ms: u64,
    pub plot_window: usize,
    pub plot_channel: u8,
    /// Wait after switching an output before the next sample
    pub output_settle_ms: u64,
    pub export_dir: PathBuf,
    /// LAN addresses to list alongside enumerated serial ports
    pub resources: Vec<String>,
}
impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout_ms: 2000,
            sample_interval_ms: 1000,
            plot_interval_ms: 1000,
            plot_window: 500,
            plot_channel: 1,
            output_settle_ms: 200,
            export_dir: PathBuf::from("."),
            resources: vec![],
        }
    }
}
impl Settings {
    pub fn from_toml(text: &str) -> Result<Self> {
        let settings: Self =
            toml::from_str(text).map_err(|e| Error::Validation(format!("Bad settings: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
            .map_err(|e| Error::Validation(format!("{}: {e}", path.display())))
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("timeout_ms", self.timeout_ms),
            ("sample_interval_ms", self.sample_interval_ms),
            ("plot_interval_ms", self.plot_interval_ms),
        ] {
            if value == 0 {
                return Err(Error::Validation(format!("{name} must be greater than 0")));
            }
        }
        if self.plot_window == 0 {
            return Err(Error::Validation("plot_window must be greater than 0".into()));
        }
        Channel::new(self.plot_channel)?;
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn monitor_config(&self) -> Result<MonitorConfig> {
        Ok(MonitorConfig {
            sample_interval: Duration::from_millis(self.sample_interval_ms),
            plot_interval: Duration::from_millis(self.plot_interval_ms),
            plot_window: self.plot_window,
            plot_channel: Channel::new(self.plot_channel)?,
            max_samples: None,
        })
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            output_settle: Duration::from_millis(self.output_settle_ms),
            export_dir: self.export_dir.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(Settings::from_toml("").unwrap(), Settings::default());
    }

    #[test]
    fn overrides_and_converts() {
        let settings = Settings::from_toml(
            r#"
            sample_interval_ms = 250
            plot_channel = 2
            resources = ["TCPIP0::192.168.1.5::inst0::INSTR"]
            "#,
        )
        .unwrap();

        let monitor = settings.monitor_config().unwrap();
        assert_eq!(monitor.sample_interval, Duration::from_millis(250));
        assert_eq!(monitor.plot_channel.number(), 2);
        assert_eq!(monitor.plot_window, 500);
        assert_eq!(settings.resources.len(), 1);
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(matches!(
            Settings::from_toml("plot_channel = 4"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            Settings::from_toml("sample_interval_ms = 0"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            Settings::from_toml("plot_windw = 10"),
            Err(Error::Validation(_))
        ));
    }
}
