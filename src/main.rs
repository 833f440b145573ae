use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use dp832_monitor::{
    config::Settings,
    data::{Reading, Unit},
    display::TerminalDisplay,
    equipment::{
        drivers::psu_rigol::Dp832,
        psu::{Channel, PowerSupplyEquipment},
    },
    error::Result,
    monitor::{Monitor, MonitorConfig, stop_signal},
    protocol::{DefaultResourceManager, ResourceManager},
    session::Session,
};
use log::{error, info};

#[derive(Parser)]
#[command(
    name = "dp832-monitor",
    version,
    about = "Control and monitor a Rigol DP832 power supply"
)]
struct Cli {
    /// TOML settings file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Connect and reply timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List serial ports, configured LAN addresses and the simulator
    List,
    /// Print identification, setpoints, protection and status
    Status {
        /// VISA resource address, e.g. TCPIP0::192.168.1.5::inst0::INSTR
        resource: String,
        /// Only this channel (1-3)
        #[arg(short, long)]
        channel: Option<u8>,
    },
    /// Program setpoints and output state of one channel
    Set {
        resource: String,
        #[arg(short, long)]
        channel: u8,
        #[arg(long)]
        voltage: Option<f64>,
        #[arg(long)]
        current: Option<f64>,
        #[arg(long, value_enum)]
        output: Option<Switch>,
    },
    /// Read live values of one channel
    Measure {
        resource: String,
        #[arg(short, long)]
        channel: u8,
        #[arg(long, value_enum, default_value_t = Quantity::All)]
        quantity: Quantity,
    },
    /// Arm or disarm over-current / over-voltage protection
    Protect {
        resource: String,
        #[arg(short, long)]
        channel: u8,
        #[arg(value_enum)]
        kind: ProtectionKind,
        #[arg(value_enum)]
        state: Switch,
        threshold: f64,
    },
    /// Clear latched OVP and OCP trips
    Clear {
        resource: String,
        #[arg(short, long)]
        channel: u8,
    },
    /// Sample all channels until Ctrl-C
    Monitor {
        resource: String,
        #[arg(long)]
        interval_ms: Option<u64>,
        #[arg(long)]
        plot_interval_ms: Option<u64>,
        #[arg(long)]
        plot_window: Option<usize>,
        #[arg(long)]
        plot_channel: Option<u8>,
        /// Stop after this many samples
        #[arg(long)]
        samples: Option<usize>,
        /// Write the history to CSV when monitoring ends
        #[arg(long)]
        export: bool,
        #[arg(long)]
        export_dir: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
}
impl Switch {
    fn enabled(self) -> bool {
        matches!(self, Self::On)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Quantity {
    Voltage,
    Current,
    Power,
    All,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProtectionKind {
    Ocp,
    Ovp,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    if let Some(timeout_ms) = cli.timeout_ms {
        settings.timeout_ms = timeout_ms;
    }
    settings.validate()?;

    let rm = DefaultResourceManager::new(settings.timeout())
        .with_resources(settings.resources.iter().cloned());

    match cli.command {
        Command::List => {
            for resource in rm.list_resources().await? {
                println!("{resource}");
            }
        }
        Command::Status { resource, channel } => {
            let mut psu = Dp832::open(&rm, &resource).await?;
            let res = print_status(&mut psu, channel).await;
            psu.close().await?;
            res?;
        }
        Command::Set {
            resource,
            channel,
            voltage,
            current,
            output,
        } => {
            let mut session = Session::new(settings.session_options());
            session.connect(&rm, &resource).await?;
            let res = apply_setpoints(&mut session, channel, voltage, current, output).await;
            session.disconnect().await?;
            res?;
        }
        Command::Measure {
            resource,
            channel,
            quantity,
        } => {
            let mut psu = Dp832::open(&rm, &resource).await?;
            let res = print_measurement(&mut psu, channel, quantity).await;
            psu.close().await?;
            res?;
        }
        Command::Protect {
            resource,
            channel,
            kind,
            state,
            threshold,
        } => {
            let mut psu = Dp832::open(&rm, &resource).await?;
            let res = match kind {
                ProtectionKind::Ocp => psu.set_ocp(channel, state.enabled(), threshold).await,
                ProtectionKind::Ovp => psu.set_ovp(channel, state.enabled(), threshold).await,
            };
            psu.close().await?;
            res?;
        }
        Command::Clear { resource, channel } => {
            let mut psu = Dp832::open(&rm, &resource).await?;
            let res = psu.clear_overprotection(channel).await;
            psu.close().await?;
            res?;
        }
        Command::Monitor {
            resource,
            interval_ms,
            plot_interval_ms,
            plot_window,
            plot_channel,
            samples,
            export,
            export_dir,
        } => {
            if let Some(interval_ms) = interval_ms {
                settings.sample_interval_ms = interval_ms;
            }
            if let Some(plot_interval_ms) = plot_interval_ms {
                settings.plot_interval_ms = plot_interval_ms;
            }
            if let Some(plot_window) = plot_window {
                settings.plot_window = plot_window;
            }
            if let Some(plot_channel) = plot_channel {
                settings.plot_channel = plot_channel;
            }
            if let Some(export_dir) = export_dir {
                settings.export_dir = export_dir;
            }
            settings.validate()?;

            let mut config = settings.monitor_config()?;
            config.max_samples = samples;

            run_monitor(&rm, &resource, &settings, config, export).await?;
        }
    }

    Ok(())
}

async fn apply_setpoints(
    session: &mut Session,
    channel: u8,
    voltage: Option<f64>,
    current: Option<f64>,
    output: Option<Switch>,
) -> Result<()> {
    if let Some(voltage) = voltage {
        session.set_voltage(channel, voltage).await?;
    }
    if let Some(current) = current {
        session.set_current(channel, current).await?;
    }
    if let Some(output) = output {
        session.set_output(channel, output.enabled()).await?;
    }
    Ok(())
}

async fn print_status(psu: &mut Dp832, channel: Option<u8>) -> Result<()> {
    println!("{}", psu.idn());

    let channels: Vec<Channel> = match channel {
        Some(chan) => vec![Channel::new(chan)?],
        None => Channel::all().collect(),
    };

    for ch in channels {
        let num = ch.number();
        let status = psu.channel_status(num).await?;
        let setpoints = psu.read_setpoints(num).await?;
        let ocp = psu.get_ocp(num).await?;
        let ovp = psu.get_ovp(num).await?;

        println!("{ch}:");
        println!(
            "  output:    {} ({})",
            if status.output_on { "ON" } else { "OFF" },
            status.mode
        );
        println!(
            "  setpoints: {} / {}",
            Reading::new(Unit::Voltage, setpoints.voltage),
            Reading::new(Unit::Current, setpoints.current)
        );
        println!(
            "  OCP:       {} at {}{}",
            if ocp.enabled { "armed" } else { "off" },
            Reading::new(Unit::Current, ocp.threshold),
            if status.ocp_tripped { ", TRIPPED" } else { "" }
        );
        println!(
            "  OVP:       {} at {}{}",
            if ovp.enabled { "armed" } else { "off" },
            Reading::new(Unit::Voltage, ovp.threshold),
            if status.ovp_tripped { ", TRIPPED" } else { "" }
        );
        println!("  tracking:  {}", status.tracking);
    }

    Ok(())
}

async fn print_measurement(psu: &mut Dp832, channel: u8, quantity: Quantity) -> Result<()> {
    match quantity {
        Quantity::Voltage => {
            let value = psu.measure_voltage(channel).await?;
            println!("{}", Reading::new(Unit::Voltage, value));
        }
        Quantity::Current => {
            let value = psu.measure_current(channel).await?;
            println!("{}", Reading::new(Unit::Current, value));
        }
        Quantity::Power => {
            let value = psu.measure_power(channel).await?;
            println!("{}", Reading::new(Unit::Power, value));
        }
        Quantity::All => {
            let [v, i, p] = psu.measure_all(channel).await?.readings();
            println!("{v}  {i}  {p}");
        }
    }
    Ok(())
}

async fn run_monitor(
    rm: &dyn ResourceManager,
    resource: &str,
    settings: &Settings,
    config: MonitorConfig,
    export: bool,
) -> Result<()> {
    let mut session = Session::new(settings.session_options());
    session.connect(rm, resource).await?;
    println!("{}", session.driver()?.idn());

    let (stop_tx, mut stop_rx) = stop_signal();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("stopping monitor");
                let _ = stop_tx.send(true);
            }
            Err(e) => {
                // Keep the sender alive, dropping it would stop the monitor
                error!("Cannot listen for Ctrl-C: {e}");
                std::future::pending::<()>().await;
            }
        }
    });

    let mut monitor = Monitor::new(config, TerminalDisplay::stdout());
    let res = session.run_monitor(&mut monitor, &mut stop_rx).await;
    if let Err(e) = &res {
        error!("monitor aborted: {e}");
    }

    if export && !session.history().is_empty() {
        let path = session.export()?;
        println!("Exported {} samples to {}", session.history().len(), path.display());
    }

    session.disconnect().await?;
    res.map(|_| ())
}
