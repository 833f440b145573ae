use std::time::Duration;

use async_trait::async_trait;
use dp832_monitor::{
    display::TerminalDisplay,
    equipment::psu::Channel,
    error::{Error, Result},
    monitor::{Monitor, MonitorConfig, stop_signal},
    protocol::{Protocol, ResourceManager, ScpiProtocol, SimulatedDp832},
    session::{Session, SessionOptions},
};

struct SimManager {
    sim: SimulatedDp832,
}
#[async_trait]
impl ResourceManager for SimManager {
    async fn list_resources(&self) -> Result<Vec<String>> {
        Ok(vec!["SIM::DP832::INSTR".into()])
    }

    async fn open(&self, _address: &str) -> Result<Box<dyn ScpiProtocol>> {
        let mut sim = self.sim.clone();
        sim.connect().await?;
        Ok(Box::new(sim))
    }
}

fn monitor_config(samples: usize) -> MonitorConfig {
    MonitorConfig {
        sample_interval: Duration::from_millis(10),
        plot_interval: Duration::from_secs(60),
        plot_window: 2,
        plot_channel: Channel::new(2).unwrap(),
        max_samples: Some(samples),
    }
}

#[tokio::test]
async fn monitor_then_export_csv() {
    let dir = tempfile::tempdir().unwrap();
    let sim = SimulatedDp832::new();
    let rm = SimManager { sim: sim.clone() };

    let mut session = Session::new(SessionOptions {
        output_settle: Duration::ZERO,
        export_dir: dir.path().to_path_buf(),
    });
    session.connect(&rm, "SIM::DP832::INSTR").await.unwrap();

    session.set_voltage(1, 9.5).await.unwrap();
    session.set_output(1, true).await.unwrap();

    let mut monitor = Monitor::new(monitor_config(3), TerminalDisplay::new(Vec::new()));
    let (_stop_tx, mut stop_rx) = stop_signal();
    let taken = session.run_monitor(&mut monitor, &mut stop_rx).await.unwrap();

    assert_eq!(taken, 3);
    assert_eq!(session.history().len(), 3);
    let last = session.history().last().unwrap();
    assert_eq!(last.channel(Channel::new(1).unwrap()).power, 1.9);

    let path = session.export().unwrap();
    assert_eq!(path.parent(), Some(dir.path()));
    assert!(path.extension().is_some_and(|ext| ext == "csv"));

    let text = std::fs::read_to_string(&path).unwrap();
    let mut lines = text.lines();
    assert_eq!(
        lines.next(),
        Some("time CH1_V CH1_I CH1_P CH2_V CH2_I CH2_P CH3_V CH3_I CH3_P")
    );
    let rows: Vec<_> = lines.collect();
    assert_eq!(rows.len(), 3);
    for row in rows {
        let cols: Vec<f64> = row.split(' ').map(|c| c.parse().unwrap()).collect();
        assert_eq!(cols.len(), 10);
        assert_eq!(&cols[1..4], &[9.5, 0.2, 1.9]);
    }

    // The plot interval is long, so only the first tick redraws
    let out = String::from_utf8_lossy(monitor.display().get_ref());
    assert_eq!(out.matches("-- CH2, last").count(), 1);
    assert_eq!(out.matches(" CH1 ").count(), 3);

    session.disconnect().await.unwrap();
    assert!(!sim.is_connected());
    assert!(session.history().is_empty());
}

#[tokio::test]
async fn monitor_stops_on_driver_error() {
    let sim = SimulatedDp832::new();
    let rm = SimManager { sim: sim.clone() };
    let mut session = Session::new(SessionOptions::default());
    session.connect(&rm, "SIM::DP832::INSTR").await.unwrap();

    sim.respond_with(":MEAS:ALL? CH3", "garbage");

    let mut monitor = Monitor::new(monitor_config(5), TerminalDisplay::new(Vec::new()));
    let (_stop_tx, mut stop_rx) = stop_signal();
    let res = session.run_monitor(&mut monitor, &mut stop_rx).await;

    assert!(matches!(res, Err(Error::Parse(_))));
    assert!(session.history().is_empty());
}

#[tokio::test]
async fn monitor_requires_connection() {
    let mut session = Session::new(SessionOptions::default());
    let mut monitor = Monitor::new(monitor_config(1), TerminalDisplay::new(Vec::new()));
    let (_stop_tx, mut stop_rx) = stop_signal();

    assert!(matches!(
        session.run_monitor(&mut monitor, &mut stop_rx).await,
        Err(Error::Connection(_))
    ));
}
