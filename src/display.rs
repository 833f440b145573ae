use std::io::{Stdout, Write};

use strum::IntoEnumIterator;

use crate::{
    data::{Reading, Unit},
    equipment::psu::Channel,
    error::Result,
    history::{ChannelSeries, Sample},
    monitor::MonitorDisplay,
};

/// Plain-text dashboard: one metrics line per channel each sample, and a
/// min/last/max summary of the plotted channel when the plot refreshes.
pub struct TerminalDisplay<W: Write = Stdout> {
    out: W,
}
impl TerminalDisplay<Stdout> {
    pub fn stdout() -> Self {
        Self {
            out: std::io::stdout(),
        }
    }
}
impl<W: Write> TerminalDisplay<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
impl<W: Write> MonitorDisplay for TerminalDisplay<W> {
    fn show_metrics(&mut self, sample: &Sample) -> Result<()> {
        let time = chrono::DateTime::from_timestamp_micros((sample.timestamp * 1e6) as i64)
            .map(|t| t.with_timezone(&chrono::Local).format("%H:%M:%S").to_string())
            .unwrap_or_else(|| sample.timestamp.to_string());

        for ch in Channel::all() {
            let [v, i, p] = sample.channel(ch).readings();
            writeln!(self.out, "{time} {ch}  {v:>12}  {i:>12}  {p:>12}")?;
        }
        self.out.flush()?;
        Ok(())
    }

    fn refresh_plot(&mut self, channel: Channel, series: &ChannelSeries) -> Result<()> {
        writeln!(self.out, "-- {channel}, last {} samples --", series.len())?;
        for unit in Unit::iter() {
            let values = series.values(unit);
            let Some(last) = values.last() else {
                continue;
            };
            let min = values.iter().copied().fold(f64::INFINITY, f64::min);
            let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            writeln!(
                self.out,
                "   min {:>12}  last {:>12}  max {:>12}",
                Reading::new(unit, min),
                Reading::new(unit, *last),
                Reading::new(unit, max)
            )?;
        }
        self.out.flush()?;
        Ok(())
    }
}
