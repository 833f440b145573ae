use async_trait::async_trait;
use log::{debug, info, warn};

use crate::{
    equipment::psu::{
        Channel, ChannelStatus, Measurement, OutputMode, PowerSupplyEquipment, Protection,
        ScpiBool,
    },
    error::{Error, Result},
    model::ModelInfo,
    protocol::{ResourceManager, ScpiProtocol},
};

/// Rigol DP832 driver.
///
/// Every getter queries the instrument; nothing is cached except the
/// identification read at open.
pub struct Dp832 {
    address: String,
    proto: Option<Box<dyn ScpiProtocol>>,
    idn: String,
    model: Option<ModelInfo>,
}
impl Dp832 {
    /// Open `address` through `rm` and identify the instrument
    pub async fn open(rm: &dyn ResourceManager, address: &str) -> Result<Self> {
        let proto = rm.open(address).await?;
        Self::from_protocol(address, proto).await
    }

    /// Wrap an already connected transport
    pub async fn from_protocol(address: &str, mut proto: Box<dyn ScpiProtocol>) -> Result<Self> {
        let idn = proto.identify().await?;
        let model = match ModelInfo::from_idn(&idn) {
            Ok(model) => {
                if !model.is_dp832() {
                    warn!("{address} identifies as {model}, expected a DP832");
                }
                Some(model)
            }
            Err(e) => {
                warn!("{address}: {e}");
                None
            }
        };

        info!(resource = address; "connected to {idn}");

        Ok(Self {
            address: address.to_string(),
            proto: Some(proto),
            idn,
            model,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn model(&self) -> Option<&ModelInfo> {
        self.model.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.proto.is_some()
    }

    fn proto(&mut self) -> Result<&mut (dyn ScpiProtocol + 'static)> {
        match self.proto.as_deref_mut() {
            Some(proto) => Ok(proto),
            None => Err(Error::Connection(format!("{} is closed", self.address))),
        }
    }

    async fn send(&mut self, cmd: String) -> Result<()> {
        self.proto()?.send(cmd).await
    }

    async fn query_str(&mut self, cmd: String) -> Result<String> {
        let resp = self.proto()?.query(cmd).await?;
        Ok(String::from_utf8_lossy(&resp).trim_end().to_string())
    }

    async fn query_f64(&mut self, cmd: String) -> Result<f64> {
        let resp = self.query_str(cmd).await?;
        parse_f64(&resp)
    }

    async fn query_bool(&mut self, cmd: String) -> Result<bool> {
        let resp = self.query_str(cmd).await?;
        ScpiBool::parse_reply(&resp)
    }
}

fn on_off(state: bool) -> &'static str {
    if state { "ON" } else { "OFF" }
}

fn check_value(what: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(Error::Validation(format!("{what} must be finite, got {value}")))
    }
}

pub fn parse_f64(reply: &str) -> Result<f64> {
    let reply = reply.trim();
    reply
        .parse()
        .map_err(|e| Error::Parse(format!("Could not parse response `{reply}`: {e}")))
}

/// Parse a `:MEAS:ALL?` reply of exactly three comma separated numbers
pub fn parse_measure_all(reply: &str) -> Result<Measurement> {
    let values = reply
        .trim()
        .split(',')
        .map(parse_f64)
        .collect::<Result<Vec<_>>>()?;

    match values.as_slice() {
        [voltage, current, power] => Ok(Measurement::new(*voltage, *current, *power)),
        _ => Err(Error::Parse(format!(
            "Expected 3 values from :MEAS:ALL?, got {} in `{}`",
            values.len(),
            reply.trim()
        ))),
    }
}

#[async_trait]
impl PowerSupplyEquipment for Dp832 {
    fn idn(&self) -> &str {
        &self.idn
    }

    async fn channel_status(&mut self, chan: u8) -> Result<ChannelStatus> {
        let ch = Channel::new(chan)?;

        let mode = self.query_str(format!(":OUTPUT:MODE? {ch}")).await?;
        let ocp_tripped = self.query_bool(format!(":OUTPUT:OCP:QUES? {ch}")).await?;
        let ovp_tripped = self.query_bool(format!(":OUTPUT:OVP:QUES? {ch}")).await?;
        let output_on = self.query_bool(format!(":OUTPUT:STAT? {ch}")).await?;
        let tracking = self.query_bool(format!(":OUTPUT:TRACK? {ch}")).await?;

        Ok(ChannelStatus {
            mode: mode
                .parse::<OutputMode>()
                .unwrap_or_else(|_| OutputMode::Other(mode.clone())),
            output_on,
            ocp_tripped,
            ovp_tripped,
            tracking,
        })
    }

    async fn set_output(&mut self, chan: u8, on: bool) -> Result<()> {
        let ch = Channel::new(chan)?;
        debug!("{ch} output {}", on_off(on));
        self.send(format!("OUTP {ch},{}", on_off(on))).await
    }

    async fn get_output(&mut self, chan: u8) -> Result<bool> {
        let ch = Channel::new(chan)?;
        self.query_bool(format!(":OUTPUT:STAT? {ch}")).await
    }

    async fn set_voltage(&mut self, chan: u8, voltage: f64) -> Result<()> {
        let ch = Channel::new(chan)?;
        check_value("Voltage setpoint", voltage)?;
        self.send(format!("SOURCE{}:VOLT {voltage}", ch.number())).await
    }

    async fn get_voltage(&mut self, chan: u8) -> Result<f64> {
        let ch = Channel::new(chan)?;
        self.query_f64(format!("SOURCE{}:VOLT?", ch.number())).await
    }

    async fn set_current(&mut self, chan: u8, current: f64) -> Result<()> {
        let ch = Channel::new(chan)?;
        check_value("Current setpoint", current)?;
        self.send(format!("SOURCE{}:CURR {current}", ch.number())).await
    }

    async fn get_current(&mut self, chan: u8) -> Result<f64> {
        let ch = Channel::new(chan)?;
        self.query_f64(format!("SOURCE{}:CURR?", ch.number())).await
    }

    async fn measure_voltage(&mut self, chan: u8) -> Result<f64> {
        let ch = Channel::new(chan)?;
        self.query_f64(format!(":MEAS:VOLT? {ch}")).await
    }

    async fn measure_current(&mut self, chan: u8) -> Result<f64> {
        let ch = Channel::new(chan)?;
        self.query_f64(format!(":MEAS:CURR? {ch}")).await
    }

    async fn measure_power(&mut self, chan: u8) -> Result<f64> {
        let ch = Channel::new(chan)?;
        self.query_f64(format!(":MEAS:POWE? {ch}")).await
    }

    async fn measure_all(&mut self, chan: u8) -> Result<Measurement> {
        let ch = Channel::new(chan)?;
        let resp = self.query_str(format!(":MEAS:ALL? {ch}")).await?;
        parse_measure_all(&resp)
    }

    async fn set_ocp(&mut self, chan: u8, enabled: bool, threshold: f64) -> Result<()> {
        let ch = Channel::new(chan)?;
        check_value("OCP threshold", threshold)?;
        // Enable state first, then the threshold
        self.send(format!("OUTP:OCP {ch},{}", on_off(enabled))).await?;
        self.send(format!("OUTP:OCP:VAL {ch},{threshold}")).await
    }

    async fn get_ocp(&mut self, chan: u8) -> Result<Protection> {
        let ch = Channel::new(chan)?;
        let threshold = self.query_f64(format!("OUTP:OCP:VAL? {ch}")).await?;
        let enabled = self.query_bool(format!("OUTP:OCP? {ch}")).await?;
        Ok(Protection { enabled, threshold })
    }

    async fn set_ovp(&mut self, chan: u8, enabled: bool, threshold: f64) -> Result<()> {
        let ch = Channel::new(chan)?;
        check_value("OVP threshold", threshold)?;
        self.send(format!("OUTP:OVP {ch},{}", on_off(enabled))).await?;
        self.send(format!("OUTP:OVP:VAL {ch},{threshold}")).await
    }

    async fn get_ovp(&mut self, chan: u8) -> Result<Protection> {
        let ch = Channel::new(chan)?;
        let threshold = self.query_f64(format!("OUTP:OVP:VAL? {ch}")).await?;
        let enabled = self.query_bool(format!("OUTP:OVP? {ch}")).await?;
        Ok(Protection { enabled, threshold })
    }

    async fn clear_overprotection(&mut self, chan: u8) -> Result<()> {
        let ch = Channel::new(chan)?;
        self.send(format!("OUTP:OVP:CLEAR {ch}")).await?;
        self.send(format!("OUTP:OCP:CLEAR {ch}")).await
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut proto) = self.proto.take() {
            info!(resource = self.address.as_str(); "disconnecting");
            proto.disconnect().await?;
        }
        Ok(())
    }
}
