//! Periodic sampling of all channels into the history buffer.

use std::time::Duration;

use log::{debug, info};
use tokio::{
    sync::watch,
    time::{Instant, MissedTickBehavior},
};

use crate::{
    equipment::psu::{CHANNEL_COUNT, Channel, Measurement, PowerSupplyEquipment},
    error::{Error, Result},
    history::{ChannelSeries, HistoryBuffer, Sample},
};

/// Renders what the monitor collects
pub trait MonitorDisplay {
    /// Called after every sample is appended
    fn show_metrics(&mut self, sample: &Sample) -> Result<()>;

    /// Called when the plot interval has elapsed or the plotted channel changes
    fn refresh_plot(&mut self, channel: Channel, series: &ChannelSeries) -> Result<()>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct MonitorConfig {
    pub sample_interval: Duration,
    pub plot_interval: Duration,
    /// Number of most recent rows handed to the plot
    pub plot_window: usize,
    pub plot_channel: Channel,
    /// Stop by itself after this many samples
    pub max_samples: Option<usize>,
}
impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(1),
            plot_interval: Duration::from_secs(1),
            plot_window: 500,
            plot_channel: Channel::default(),
            max_samples: None,
        }
    }
}

/// Sender half flips to `true` to stop [`Monitor::run`]
pub fn stop_signal() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

fn now_timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1e6
}

pub struct Monitor<D: MonitorDisplay> {
    config: MonitorConfig,
    display: D,
    last_plot: Option<Instant>,
}
impl<D: MonitorDisplay> Monitor<D> {
    pub fn new(config: MonitorConfig, display: D) -> Self {
        Self {
            config,
            display,
            last_plot: None,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn plot_channel(&self) -> Channel {
        self.config.plot_channel
    }

    /// Switch the plotted channel and redraw from samples already collected
    pub fn select_plot_channel(&mut self, chan: u8, history: &HistoryBuffer) -> Result<()> {
        self.config.plot_channel = Channel::new(chan)?;
        self.refresh_plot(history)
    }

    fn refresh_plot(&mut self, history: &HistoryBuffer) -> Result<()> {
        let ch = self.config.plot_channel;
        let series = history.channel_series(ch, self.config.plot_window);
        self.display.refresh_plot(ch, &series)?;
        self.last_plot = Some(Instant::now());
        Ok(())
    }

    /// One sampling iteration. On any driver or display error the history is
    /// left as it was before the call.
    pub async fn tick(
        &mut self,
        psu: &mut dyn PowerSupplyEquipment,
        history: &mut HistoryBuffer,
    ) -> Result<()> {
        let mut channels = [Measurement::default(); CHANNEL_COUNT as usize];
        for ch in Channel::all() {
            channels[ch.index()] = psu.measure_all(ch.number()).await?;
        }

        history.push(Sample {
            timestamp: now_timestamp(),
            channels,
        });
        debug!(rows = history.len(); "sampled {:?}", history.last());

        if let Err(e) = self.render(history) {
            history.pop();
            return Err(e);
        }
        Ok(())
    }

    fn render(&mut self, history: &HistoryBuffer) -> Result<()> {
        if let Some(sample) = history.last() {
            self.display.show_metrics(sample)?;
        }

        let plot_due = match self.last_plot {
            None => true,
            Some(last) => last.elapsed() >= self.config.plot_interval,
        };
        if plot_due {
            self.refresh_plot(history)?;
        }

        Ok(())
    }

    /// Sample every `sample_interval` until `stop` turns true, the sender is
    /// dropped, `max_samples` is reached, or a tick fails. Returns the number
    /// of samples taken.
    pub async fn run(
        &mut self,
        psu: &mut dyn PowerSupplyEquipment,
        history: &mut HistoryBuffer,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<usize> {
        if self.config.sample_interval.is_zero() {
            return Err(Error::Validation("Sample interval must be non-zero".into()));
        }

        let mut interval = tokio::time::interval(self.config.sample_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_ms = self.config.sample_interval.as_millis() as u64;
            "monitor started"
        );

        let mut samples = 0;
        loop {
            if *stop.borrow_and_update() {
                break;
            }
            if self.config.max_samples.is_some_and(|max| samples >= max) {
                break;
            }

            tokio::select! {
                biased;
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = interval.tick() => {}
            }

            self.tick(psu, history).await?;
            samples += 1;
        }

        info!(samples = samples; "monitor stopped");

        Ok(samples)
    }
}
