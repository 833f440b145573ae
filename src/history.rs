//! Sample history collected by the monitor loop.
//!
//! Rows are appended in sampling order and never dropped. Callers that only
//! want to display recent data take a [`HistoryBuffer::tail`] view instead.

use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
};

use log::info;
use strum::IntoEnumIterator;

use crate::{
    data::Unit,
    equipment::psu::{CHANNEL_COUNT, Channel, Measurement},
    error::Result,
};

/// Timestamp plus V/I/P for each channel
pub const COLUMN_COUNT: usize = 1 + 3 * CHANNEL_COUNT as usize;

/// One completed sampling iteration
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sample {
    /// Seconds since the UNIX epoch
    pub timestamp: f64,
    pub channels: [Measurement; CHANNEL_COUNT as usize],
}
impl Sample {
    pub fn channel(&self, ch: Channel) -> Measurement {
        self.channels[ch.index()]
    }

    /// Flattened row in [`column_names`] order
    pub fn columns(&self) -> [f64; COLUMN_COUNT] {
        let mut cols = [0.0; COLUMN_COUNT];
        cols[0] = self.timestamp;
        for (idx, m) in self.channels.iter().enumerate() {
            cols[1 + idx * 3] = m.voltage;
            cols[2 + idx * 3] = m.current;
            cols[3 + idx * 3] = m.power;
        }
        cols
    }
}

/// `time`, then `CHn_V`, `CHn_I`, `CHn_P` for each channel
pub fn column_names() -> Vec<String> {
    let mut names = vec!["time".to_string()];
    for ch in Channel::all() {
        for unit in Unit::iter() {
            names.push(format!("{ch}_{}", unit.column_suffix()));
        }
    }
    names
}

/// Column-sliced view of one channel over a window of samples
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChannelSeries {
    pub time: Vec<f64>,
    pub voltage: Vec<f64>,
    pub current: Vec<f64>,
    pub power: Vec<f64>,
}
impl ChannelSeries {
    pub fn values(&self, unit: Unit) -> &[f64] {
        match unit {
            Unit::Voltage => &self.voltage,
            Unit::Current => &self.current,
            Unit::Power => &self.power,
        }
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }
}

#[derive(Clone, Debug, Default)]
pub struct HistoryBuffer {
    rows: Vec<Sample>,
}
impl HistoryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample. A timestamp earlier than the previous row is raised to
    /// it so the table stays ordered if the wall clock steps backwards.
    pub fn push(&mut self, mut sample: Sample) -> &Sample {
        if let Some(last) = self.rows.last() {
            sample.timestamp = sample.timestamp.max(last.timestamp);
        }
        self.rows.push(sample);
        &self.rows[self.rows.len() - 1]
    }

    /// Remove and return the newest row
    pub fn pop(&mut self) -> Option<Sample> {
        self.rows.pop()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Sample] {
        &self.rows
    }

    pub fn last(&self) -> Option<&Sample> {
        self.rows.last()
    }

    /// The last `n` rows, or all of them if there are fewer
    pub fn tail(&self, n: usize) -> &[Sample] {
        &self.rows[self.rows.len().saturating_sub(n)..]
    }

    /// Slice one channel's columns out of the last `window` rows
    pub fn channel_series(&self, ch: Channel, window: usize) -> ChannelSeries {
        let mut series = ChannelSeries::default();
        for row in self.tail(window) {
            let m = row.channel(ch);
            series.time.push(row.timestamp);
            series.voltage.push(m.voltage);
            series.current.push(m.current);
            series.power.push(m.power);
        }
        series
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }

    /// Write the whole table, header first, space delimited
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::WriterBuilder::new()
            .delimiter(b' ')
            .from_writer(writer);
        wtr.write_record(column_names())?;
        for row in &self.rows {
            wtr.write_record(row.columns().iter().map(f64::to_string))?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// Export to `dir/YYYY-MM-DD-HH-MM-SS.csv` named after the local time
    pub fn export_csv(&self, dir: &Path) -> Result<PathBuf> {
        let name = chrono::Local::now()
            .format("%Y-%m-%d-%H-%M-%S.csv")
            .to_string();
        let path = dir.join(name);
        self.write_csv(File::create(&path)?)?;

        info!(rows = self.rows.len(); "exported history to {}", path.display());

        Ok(path)
    }
}
