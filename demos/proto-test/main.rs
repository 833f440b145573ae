use std::{env, process::exit};

use dp832_monitor::protocol::{DefaultResourceManager, Protocol, ResourceManager};
use tokio::time::Instant;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    if args.len() != 2 {
        println!("Usage: ... <resource>");
        println!("  <resource>:");
        println!("    TCPIP[n]::<host>[::<port>]::SOCKET: SCPI over raw TCP");
        println!("    TCPIP[n]::<host>::inst0::INSTR: DP800 LAN port (5555)");
        println!("    ASRL<port>::INSTR: SCPI over serial");
        println!("    SIM::DP832::INSTR: in-process simulator");
        exit(1);
    }

    let rm = DefaultResourceManager::default();

    let start = Instant::now();
    let mut scpi = rm.open(&args[1]).await?;
    let stop = Instant::now();

    println!("Connect: {} ms", (stop - start).as_secs_f64() * 1000.);

    let start = Instant::now();
    scpi.send("*IDN?").await?;
    let stop = Instant::now();

    println!("Send: {} ms", (stop - start).as_secs_f64() * 1000.);

    let start = Instant::now();
    let data = scpi.recv().await?;
    let stop = Instant::now();

    println!("Recv: {} ms", (stop - start).as_secs_f64() * 1000.);
    println!("  Data: {}", String::from_utf8_lossy(&data).trim_end());

    let start = Instant::now();
    scpi.query(":MEAS:ALL? CH1").await?;
    let stop = Instant::now();

    println!("Query :MEAS:ALL?: {} ms", (stop - start).as_secs_f64() * 1000.);

    // Unknown query: the instrument stays silent and the read times out
    let start = Instant::now();
    let resp = scpi.query(":SYST:BOGUS?").await;
    let stop = Instant::now();

    println!(
        "Query with no reply: {} ms",
        (stop - start).as_secs_f64() * 1000.
    );
    if let Err(e) = resp {
        println!("  Error: {e}");
    }

    scpi.disconnect().await?;

    Ok(())
}
