//! Application state for one operator session: the connected supply, the
//! control values shown to the operator, and the collected history.

use std::{path::PathBuf, time::Duration};

use log::{info, warn};
use tokio::sync::watch;

use crate::{
    equipment::{
        drivers::psu_rigol::Dp832,
        psu::{Channel, ChannelSetpoints, PowerSupplyEquipment},
    },
    error::{Error, Result},
    history::HistoryBuffer,
    monitor::{Monitor, MonitorDisplay},
    protocol::ResourceManager,
};

#[derive(Clone, Debug, PartialEq)]
pub struct SessionOptions {
    /// Wait after switching an output so the next sample reflects it
    pub output_settle: Duration,
    /// Where [`Session::export`] writes CSV files
    pub export_dir: PathBuf,
}
impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            output_settle: Duration::from_millis(200),
            export_dir: PathBuf::from("."),
        }
    }
}

pub struct Session {
    options: SessionOptions,
    address: Option<String>,
    driver: Option<Box<dyn PowerSupplyEquipment>>,
    setpoints: Vec<ChannelSetpoints>,
    history: HistoryBuffer,
}
impl Session {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            options,
            address: None,
            driver: None,
            setpoints: vec![],
            history: HistoryBuffer::new(),
        }
    }

    /// Connect to the DP832 at `address`.
    ///
    /// Connecting again to the same address is refused. A different address
    /// closes the current connection first.
    pub async fn connect(&mut self, rm: &dyn ResourceManager, address: &str) -> Result<()> {
        self.release_for(address).await?;
        let driver = Dp832::open(rm, address).await?;
        self.attach(address, Box::new(driver)).await
    }

    /// Bind an already opened driver and read its setpoints
    pub async fn attach(
        &mut self,
        address: &str,
        mut driver: Box<dyn PowerSupplyEquipment>,
    ) -> Result<()> {
        self.release_for(address).await?;

        let mut setpoints = vec![];
        for ch in Channel::all() {
            match driver.read_setpoints(ch.number()).await {
                Ok(sp) => setpoints.push(sp),
                Err(e) => {
                    if let Err(close_err) = driver.close().await {
                        warn!(resource = address; "close after failed setup: {close_err}");
                    }
                    return Err(e);
                }
            }
        }

        info!(resource = address; "session started with {}", driver.idn());

        self.address = Some(address.to_string());
        self.driver = Some(driver);
        self.setpoints = setpoints;
        self.history.clear();
        Ok(())
    }

    async fn release_for(&mut self, address: &str) -> Result<()> {
        let Some(current) = &self.address else {
            return Ok(());
        };
        if current == address {
            return Err(Error::AlreadyConnected(address.to_string()));
        }
        self.disconnect().await
    }

    /// Close the connection and drop the session data. No-op when not connected.
    pub async fn disconnect(&mut self) -> Result<()> {
        let address = self.address.take();
        self.setpoints.clear();
        self.history.clear();
        if let Some(mut driver) = self.driver.take() {
            driver.close().await?;
            if let Some(address) = address {
                info!(resource = address.as_str(); "session ended");
            }
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.driver.is_some()
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn driver(&mut self) -> Result<&mut (dyn PowerSupplyEquipment + 'static)> {
        self.driver
            .as_deref_mut()
            .ok_or_else(|| Error::Connection("Not connected".into()))
    }

    /// Control values as last read or written, indexed by channel
    pub fn setpoints(&self) -> &[ChannelSetpoints] {
        &self.setpoints
    }

    pub fn history(&self) -> &HistoryBuffer {
        &self.history
    }

    pub async fn set_output(&mut self, chan: u8, on: bool) -> Result<()> {
        let ch = Channel::new(chan)?;
        self.driver()?.set_output(chan, on).await?;
        if let Some(sp) = self.setpoints.get_mut(ch.index()) {
            sp.output_on = on;
        }
        tokio::time::sleep(self.options.output_settle).await;
        Ok(())
    }

    pub async fn set_voltage(&mut self, chan: u8, voltage: f64) -> Result<()> {
        let ch = Channel::new(chan)?;
        self.driver()?.set_voltage(chan, voltage).await?;
        if let Some(sp) = self.setpoints.get_mut(ch.index()) {
            sp.voltage = voltage;
        }
        Ok(())
    }

    pub async fn set_current(&mut self, chan: u8, current: f64) -> Result<()> {
        let ch = Channel::new(chan)?;
        self.driver()?.set_current(chan, current).await?;
        if let Some(sp) = self.setpoints.get_mut(ch.index()) {
            sp.current = current;
        }
        Ok(())
    }

    /// Run `monitor` against this session's supply and history
    pub async fn run_monitor<D: MonitorDisplay>(
        &mut self,
        monitor: &mut Monitor<D>,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<usize> {
        let Some(driver) = self.driver.as_deref_mut() else {
            return Err(Error::Connection("Not connected".into()));
        };
        monitor.run(driver, &mut self.history, stop).await
    }

    /// Write the full history as CSV into the configured export directory
    pub fn export(&self) -> Result<PathBuf> {
        self.history.export_csv(&self.options.export_dir)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::{
        equipment::psu::{ChannelStatus, Measurement, Protection},
        protocol::{Protocol, ScpiProtocol, SimulatedDp832},
    };

    /// Hands out connections to one shared simulator
    struct SimManager {
        sim: SimulatedDp832,
    }
    #[async_trait]
    impl ResourceManager for SimManager {
        async fn list_resources(&self) -> Result<Vec<String>> {
            Ok(vec!["SIM::A".into(), "SIM::B".into()])
        }

        async fn open(&self, _address: &str) -> Result<Box<dyn ScpiProtocol>> {
            let mut sim = self.sim.clone();
            sim.connect().await?;
            Ok(Box::new(sim))
        }
    }

    /// Supply whose replies never arrive and whose link fails to close
    struct DeadSupply;

    fn dead<T>() -> Result<T> {
        Err(Error::Timeout("No reply".into()))
    }

    #[async_trait]
    impl PowerSupplyEquipment for DeadSupply {
        fn idn(&self) -> &str {
            "RIGOL TECHNOLOGIES,DP832,DEAD,0"
        }
        async fn channel_status(&mut self, _chan: u8) -> Result<ChannelStatus> {
            dead()
        }
        async fn set_output(&mut self, _chan: u8, _on: bool) -> Result<()> {
            dead()
        }
        async fn get_output(&mut self, _chan: u8) -> Result<bool> {
            dead()
        }
        async fn set_voltage(&mut self, _chan: u8, _voltage: f64) -> Result<()> {
            dead()
        }
        async fn get_voltage(&mut self, _chan: u8) -> Result<f64> {
            dead()
        }
        async fn set_current(&mut self, _chan: u8, _current: f64) -> Result<()> {
            dead()
        }
        async fn get_current(&mut self, _chan: u8) -> Result<f64> {
            dead()
        }
        async fn measure_voltage(&mut self, _chan: u8) -> Result<f64> {
            dead()
        }
        async fn measure_current(&mut self, _chan: u8) -> Result<f64> {
            dead()
        }
        async fn measure_power(&mut self, _chan: u8) -> Result<f64> {
            dead()
        }
        async fn measure_all(&mut self, _chan: u8) -> Result<Measurement> {
            dead()
        }
        async fn set_ocp(&mut self, _chan: u8, _enabled: bool, _threshold: f64) -> Result<()> {
            dead()
        }
        async fn get_ocp(&mut self, _chan: u8) -> Result<Protection> {
            dead()
        }
        async fn set_ovp(&mut self, _chan: u8, _enabled: bool, _threshold: f64) -> Result<()> {
            dead()
        }
        async fn get_ovp(&mut self, _chan: u8) -> Result<Protection> {
            dead()
        }
        async fn clear_overprotection(&mut self, _chan: u8) -> Result<()> {
            dead()
        }
        async fn close(&mut self) -> Result<()> {
            Err(Error::Connection("Link already gone".into()))
        }
    }

    fn options() -> SessionOptions {
        SessionOptions {
            output_settle: Duration::ZERO,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn connect_reads_setpoints_and_guards_reconnect() {
        let rm = SimManager {
            sim: SimulatedDp832::new(),
        };
        let mut session = Session::new(options());

        session.connect(&rm, "SIM::A").await.unwrap();
        assert!(session.is_connected());
        assert_eq!(session.setpoints().len(), 3);
        assert!(!session.setpoints()[0].output_on);

        assert!(matches!(
            session.connect(&rm, "SIM::A").await,
            Err(Error::AlreadyConnected(_))
        ));

        // Switching address closes the old link first
        session.connect(&rm, "SIM::B").await.unwrap();
        assert_eq!(session.address(), Some("SIM::B"));
    }

    #[tokio::test]
    async fn setters_update_control_values() {
        let rm = SimManager {
            sim: SimulatedDp832::new(),
        };
        let mut session = Session::new(options());
        session.connect(&rm, "SIM::A").await.unwrap();

        session.set_voltage(2, 12.0).await.unwrap();
        session.set_current(2, 0.5).await.unwrap();
        session.set_output(2, true).await.unwrap();

        assert_eq!(
            session.setpoints()[1],
            ChannelSetpoints {
                voltage: 12.0,
                current: 0.5,
                output_on: true
            }
        );
        assert!(session.driver().unwrap().get_output(2).await.unwrap());

        assert!(matches!(
            session.set_output(0, true).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let sim = SimulatedDp832::new();
        let rm = SimManager { sim: sim.clone() };
        let mut session = Session::new(options());

        // Never connected
        session.disconnect().await.unwrap();

        session.connect(&rm, "SIM::A").await.unwrap();
        assert!(sim.is_connected());
        session.disconnect().await.unwrap();
        session.disconnect().await.unwrap();

        assert!(!sim.is_connected());
        assert!(!session.is_connected());
        assert!(matches!(session.driver(), Err(Error::Connection(_))));
        assert!(matches!(
            session.set_voltage(1, 1.0).await,
            Err(Error::Connection(_))
        ));
    }

    #[tokio::test]
    async fn failed_setup_reports_read_error_not_close_error() {
        let mut session = Session::new(options());

        let res = session.attach("SIM::DEAD", Box::new(DeadSupply)).await;

        assert!(matches!(res, Err(Error::Timeout(_))), "{res:?}");
        assert!(!session.is_connected());
        assert_eq!(session.address(), None);
    }
}
