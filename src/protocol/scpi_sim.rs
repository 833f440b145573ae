//! In-process DP832 simulator.
//!
//! Answers the subset of the DP800 command set used by the driver, keeps
//! per-channel state so setters are echoed by getters, and records every
//! command it receives. Clones share the same simulated instrument.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use log::{debug, warn};

use crate::{
    error::{Error, Result},
    protocol::{Protocol, ScpiProtocol, scpi::printable},
};

const SIM_IDN: &str = "RIGOL TECHNOLOGIES,DP832,DP8SIM000001,00.01.16";
/// Default simulated load, chosen so 9.5 V gives 0.2 A / 1.9 W
const DEFAULT_LOAD_OHMS: f64 = 47.5;

#[derive(Clone, Debug)]
struct SimChannel {
    voltage: f64,
    current: f64,
    output: bool,
    ocp_enabled: bool,
    ocp_value: f64,
    ocp_tripped: bool,
    ovp_enabled: bool,
    ovp_value: f64,
    ovp_tripped: bool,
    tracking: bool,
    load_ohms: f64,
}
impl SimChannel {
    fn new(max_voltage: f64) -> Self {
        Self {
            voltage: 0.0,
            current: 1.0,
            output: false,
            ocp_enabled: false,
            ocp_value: 3.2,
            ocp_tripped: false,
            ovp_enabled: false,
            ovp_value: max_voltage + 1.0,
            ovp_tripped: false,
            tracking: false,
            load_ohms: DEFAULT_LOAD_OHMS,
        }
    }

    /// Steady-state (V, I, P) at the output terminals
    fn operating_point(&self) -> (f64, f64, f64) {
        if !self.output {
            return (0.0, 0.0, 0.0);
        }
        let cv_current = self.voltage / self.load_ohms;
        if cv_current <= self.current {
            (self.voltage, cv_current, self.voltage * cv_current)
        } else {
            let v = self.current * self.load_ohms;
            (v, self.current, v * self.current)
        }
    }

    fn mode(&self) -> &'static str {
        if self.output && self.voltage / self.load_ohms > self.current {
            "CC"
        } else {
            "CV"
        }
    }

    /// Latch protection trips, switching the output off
    fn check_protection(&mut self) {
        let (v, i, _) = self.operating_point();
        if self.ocp_enabled && i > self.ocp_value {
            self.ocp_tripped = true;
            self.output = false;
        }
        if self.ovp_enabled && v > self.ovp_value {
            self.ovp_tripped = true;
            self.output = false;
        }
    }
}

#[derive(Debug)]
struct SimState {
    connected: bool,
    channels: [SimChannel; 3],
    transcript: Vec<String>,
    pending: VecDeque<Vec<u8>>,
    overrides: HashMap<String, String>,
}

/// Simulated Rigol DP832 speaking SCPI in-process
#[derive(Clone, Debug)]
pub struct SimulatedDp832 {
    state: Arc<Mutex<SimState>>,
}
impl Default for SimulatedDp832 {
    fn default() -> Self {
        Self::new()
    }
}
impl SimulatedDp832 {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                connected: false,
                channels: [
                    SimChannel::new(30.0),
                    SimChannel::new(30.0),
                    SimChannel::new(5.0),
                ],
                transcript: vec![],
                pending: VecDeque::new(),
                overrides: HashMap::new(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every command received so far, without terminators
    pub fn transcript(&self) -> Vec<String> {
        self.state().transcript.clone()
    }

    pub fn clear_transcript(&self) {
        self.state().transcript.clear();
    }

    /// Answer `command` with `reply` instead of the simulated state
    pub fn respond_with(&self, command: &str, reply: &str) {
        self.state()
            .overrides
            .insert(command.to_string(), reply.to_string());
    }

    /// Change the simulated load resistance on a channel (1-based)
    pub fn set_load(&self, chan: u8, ohms: f64) {
        let mut state = self.state();
        if let Some(ch) = state.channels.get_mut(usize::from(chan).wrapping_sub(1)) {
            ch.load_ohms = ohms;
            ch.check_protection();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }
}

fn parse_chan(arg: &str) -> Option<usize> {
    let num: usize = arg.trim().strip_prefix("CH")?.parse().ok()?;
    (1..=3).contains(&num).then(|| num - 1)
}

fn parse_switch(arg: &str) -> Option<bool> {
    match arg.trim() {
        "ON" | "1" => Some(true),
        "OFF" | "0" => Some(false),
        _ => None,
    }
}

fn on_off(state: bool) -> String {
    let token = if state { "ON" } else { "OFF" };
    token.into()
}

fn yes_no(state: bool) -> String {
    let token = if state { "YES" } else { "NO" };
    token.into()
}

impl SimState {
    /// Execute one command, returning the reply for queries
    fn execute(&mut self, command: &str) -> Option<String> {
        let (header, args) = match command.split_once(' ') {
            Some((header, args)) => (header.to_uppercase(), args.trim().to_uppercase()),
            None => (command.to_uppercase(), String::new()),
        };

        if header == "*IDN?" {
            return Some(SIM_IDN.into());
        }

        // SOURCEn:VOLT / SOURCEn:CURR
        if let Some(rest) = header.strip_prefix("SOURCE") {
            let (num, func) = rest.split_once(':')?;
            let idx = parse_chan(&format!("CH{num}"))?;
            let ch = &mut self.channels[idx];
            return match func {
                "VOLT?" => Some(format!("{:.3}", ch.voltage)),
                "CURR?" => Some(format!("{:.4}", ch.current)),
                "VOLT" => {
                    ch.voltage = args.parse().ok()?;
                    ch.check_protection();
                    None
                }
                "CURR" => {
                    ch.current = args.parse().ok()?;
                    ch.check_protection();
                    None
                }
                _ => None,
            };
        }

        // Remaining commands lead with the channel argument
        let (chan_arg, value_arg) = match args.split_once(',') {
            Some((chan, value)) => (chan, Some(value)),
            None => (args.as_str(), None),
        };
        let idx = parse_chan(chan_arg)?;
        let ch = &mut self.channels[idx];

        match header.as_str() {
            ":OUTPUT:MODE?" => Some(ch.mode().into()),
            ":OUTPUT:OCP:QUES?" => Some(yes_no(ch.ocp_tripped)),
            ":OUTPUT:OVP:QUES?" => Some(yes_no(ch.ovp_tripped)),
            ":OUTPUT:STAT?" | ":OUTP?" => Some(on_off(ch.output)),
            ":OUTPUT:TRACK?" => Some(on_off(ch.tracking)),
            "OUTP" | ":OUTP" => {
                ch.output = parse_switch(value_arg?)?;
                ch.check_protection();
                None
            }
            ":MEAS:VOLT?" => Some(format!("{:.3}", ch.operating_point().0)),
            ":MEAS:CURR?" => Some(format!("{:.3}", ch.operating_point().1)),
            ":MEAS:POWE?" => Some(format!("{:.3}", ch.operating_point().2)),
            ":MEAS:ALL?" => {
                let (v, i, p) = ch.operating_point();
                Some(format!("{v:.3},{i:.3},{p:.3}"))
            }
            "OUTP:OCP" => {
                ch.ocp_enabled = parse_switch(value_arg?)?;
                ch.check_protection();
                None
            }
            "OUTP:OVP" => {
                ch.ovp_enabled = parse_switch(value_arg?)?;
                ch.check_protection();
                None
            }
            "OUTP:OCP:VAL" => {
                ch.ocp_value = value_arg?.trim().parse().ok()?;
                ch.check_protection();
                None
            }
            "OUTP:OVP:VAL" => {
                ch.ovp_value = value_arg?.trim().parse().ok()?;
                ch.check_protection();
                None
            }
            "OUTP:OCP:VAL?" => Some(format!("{:.3}", ch.ocp_value)),
            "OUTP:OVP:VAL?" => Some(format!("{:.3}", ch.ovp_value)),
            "OUTP:OCP?" => Some(on_off(ch.ocp_enabled)),
            "OUTP:OVP?" => Some(on_off(ch.ovp_enabled)),
            "OUTP:OCP:CLEAR" => {
                ch.ocp_tripped = false;
                None
            }
            "OUTP:OVP:CLEAR" => {
                ch.ovp_tripped = false;
                None
            }
            _ => None,
        }
    }
}

#[async_trait]
impl Protocol for SimulatedDp832 {
    async fn connect(&mut self) -> Result<()> {
        let mut state = self.state();
        if state.connected {
            return Err(Error::Connection("Already connected".into()));
        }
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        let mut state = self.state();
        state.connected = false;
        state.pending.clear();
        Ok(())
    }
}
#[async_trait]
impl ScpiProtocol for SimulatedDp832 {
    async fn int_send(&mut self, data: &[u8]) -> Result<()> {
        let mut state = self.state();
        if !state.connected {
            return Err(Error::Connection("Not connected".into()));
        }

        debug!("int_send(): {}", printable(data));

        let command = String::from_utf8_lossy(data).trim().to_string();
        state.transcript.push(command.clone());

        let reply = match state.overrides.get(&command).cloned() {
            Some(reply) => Some(reply),
            None => state.execute(&command),
        };
        match reply {
            Some(reply) => state.pending.push_back(format!("{reply}\n").into_bytes()),
            None if command.contains('?') => warn!("simulator has no reply for `{command}`"),
            None => {}
        }

        Ok(())
    }

    async fn int_recv(&mut self) -> Result<Vec<u8>> {
        let mut state = self.state();
        if !state.connected {
            return Err(Error::Connection("Not connected".into()));
        }

        // A real DP832 stays silent on unknown queries
        let resp = state
            .pending
            .pop_front()
            .ok_or_else(|| Error::Timeout("Simulator has no pending reply".into()))?;

        debug!("int_recv: {}", printable(&resp));

        Ok(resp)
    }

    async fn int_query(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.int_send(data).await?;
        self.int_recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echoes_setpoints() {
        let mut sim = SimulatedDp832::new();
        sim.connect().await.unwrap();
        let mut proto: Box<dyn ScpiProtocol> = Box::new(sim.clone());

        proto.send("SOURCE2:VOLT 12.5").await.unwrap();
        let resp = proto.query("SOURCE2:VOLT?").await.unwrap();
        assert_eq!(resp, b"12.500\n");

        assert_eq!(sim.transcript(), vec!["SOURCE2:VOLT 12.5", "SOURCE2:VOLT?"]);
    }

    #[tokio::test]
    async fn overcurrent_latches_output_off() {
        let mut sim = SimulatedDp832::new();
        sim.connect().await.unwrap();
        let mut proto: Box<dyn ScpiProtocol> = Box::new(sim.clone());

        proto.send("SOURCE1:VOLT 10").await.unwrap();
        proto.send("OUTP:OCP CH1,ON").await.unwrap();
        proto.send("OUTP:OCP:VAL CH1,0.1").await.unwrap();
        proto.send("OUTP CH1,ON").await.unwrap();

        assert_eq!(proto.query(":OUTPUT:OCP:QUES? CH1").await.unwrap(), b"YES\n");
        assert_eq!(proto.query(":OUTPUT:STAT? CH1").await.unwrap(), b"OFF\n");

        proto.send("OUTP:OCP:CLEAR CH1").await.unwrap();
        assert_eq!(proto.query(":OUTPUT:OCP:QUES? CH1").await.unwrap(), b"NO\n");
    }

    #[tokio::test]
    async fn unknown_query_gets_no_reply() {
        let mut sim = SimulatedDp832::new();
        sim.connect().await.unwrap();
        let mut proto: Box<dyn ScpiProtocol> = Box::new(sim);

        assert!(matches!(
            proto.query(":SYST:BOGUS?").await,
            Err(Error::Timeout(_))
        ));
    }
}
