use std::collections::VecDeque;
use std::thread;
use std::time::{Duration, Instant};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use crate::drivers::AcquisitionError;
use crate::types::{RawBlock, SENTINEL};
/// Interface the acquisition core needs from a streaming device.
///
/// `num_channels`, `actual_scan_rate_hz` and `ticks_per_second` are fixed once
/// the stream is running. `read_block` blocks until the next block is ready and
/// returns `Ok(None)` when the source has nothing more to give.
pub trait StreamSource {
    fn num_channels(&self) -> usize;
    fn actual_scan_rate_hz(&self) -> f64;
    fn ticks_per_second(&self) -> f64;
    fn read_block(&mut self) -> Result<Option<RawBlock>, AcquisitionError>;
    fn read_tick_counter(&mut self) -> Result<u32, AcquisitionError>;
    fn read_stream_start_ticks(&mut self) -> Result<u32, AcquisitionError>;
}
impl<S: StreamSource + ?Sized> StreamSource for Box<S> {
    fn num_channels(&self) -> usize {
        (**self).num_channels()
    }
    fn actual_scan_rate_hz(&self) -> f64 {
        (**self).actual_scan_rate_hz()
    }
    fn ticks_per_second(&self) -> f64 {
        (**self).ticks_per_second()
    }
    fn read_block(&mut self) -> Result<Option<RawBlock>, AcquisitionError> {
        (**self).read_block()
    }
    fn read_tick_counter(&mut self) -> Result<u32, AcquisitionError> {
        (**self).read_tick_counter()
    }
    fn read_stream_start_ticks(&mut self) -> Result<u32, AcquisitionError> {
        (**self).read_stream_start_ticks()
    }
}
enum ManualRead {
    Block(RawBlock),
    Failure(String),
}
/// In-memory source useful for tests and deterministic playback.
pub struct ManualSource {
    num_channels: usize,
    scan_rate_hz: f64,
    ticks_per_second: f64,
    stream_start_ticks: u32,
    live_ticks: u32,
    queue: VecDeque<ManualRead>,
}
impl ManualSource {
    pub fn new(
        num_channels: usize,
        scan_rate_hz: f64,
        blocks: impl IntoIterator<Item = RawBlock>,
    ) -> Self {
        Self {
            num_channels,
            scan_rate_hz,
            ticks_per_second: 40.0e6,
            stream_start_ticks: 0,
            live_ticks: 0,
            queue: blocks.into_iter().map(ManualRead::Block).collect(),
        }
    }
    /// Counter value latched at stream start and the value every later read returns.
    pub fn with_ticks(mut self, stream_start: u32, live: u32, ticks_per_second: f64) -> Self {
        self.stream_start_ticks = stream_start;
        self.live_ticks = live;
        self.ticks_per_second = ticks_per_second;
        self
    }
    pub fn push_block(&mut self, block: RawBlock) {
        self.queue.push_back(ManualRead::Block(block));
    }
    /// Queues a transport failure to be returned by the next read at this position.
    pub fn push_failure(&mut self, message: impl Into<String>) {
        self.queue.push_back(ManualRead::Failure(message.into()));
    }
    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}
impl StreamSource for ManualSource {
    fn num_channels(&self) -> usize {
        self.num_channels
    }
    fn actual_scan_rate_hz(&self) -> f64 {
        self.scan_rate_hz
    }
    fn ticks_per_second(&self) -> f64 {
        self.ticks_per_second
    }
    fn read_block(&mut self) -> Result<Option<RawBlock>, AcquisitionError> {
        match self.queue.pop_front() {
            Some(ManualRead::Block(block)) => Ok(Some(block)),
            Some(ManualRead::Failure(message)) => Err(AcquisitionError::Transport(message)),
            None => Ok(None),
        }
    }
    fn read_tick_counter(&mut self) -> Result<u32, AcquisitionError> {
        Ok(self.live_ticks)
    }
    fn read_stream_start_ticks(&mut self) -> Result<u32, AcquisitionError> {
        Ok(self.stream_start_ticks)
    }
}
/// Settings for [`SimulatedSource`].
#[derive(Clone, Debug)]
pub struct SimulationSettings {
    pub num_channels: usize,
    pub scan_rate_hz: f64,
    pub scans_per_read: usize,
    /// Baseline noise amplitude, in raw units.
    pub noise: f64,
    /// Chance that a block carries one spike.
    pub spike_probability: f64,
    pub spike_amplitude: f64,
    /// Chance that any single sample is reported as failed.
    pub dropout_probability: f64,
    /// Sleep so blocks arrive at the rate a real device would deliver them.
    pub paced: bool,
    pub seed: u64,
}
impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            num_channels: 3,
            scan_rate_hz: 30_000.0,
            scans_per_read: 15_000,
            noise: 0.05,
            spike_probability: 0.3,
            spike_amplitude: 5.0,
            dropout_probability: 0.0,
            paced: true,
            seed: 7,
        }
    }
}
/// Synthetic device: uniform noise, decaying spikes, and a 40 MHz tick
/// counter that starts half a second before its 32-bit wrap.
pub struct SimulatedSource {
    settings: SimulationSettings,
    rng: StdRng,
    started_at: Instant,
    stream_start_ticks: u32,
    scans_read: u64,
}
impl SimulatedSource {
    pub const TICKS_PER_SECOND: f64 = 40.0e6;
    pub fn new(settings: SimulationSettings) -> Result<Self, AcquisitionError> {
        if settings.num_channels == 0 {
            return Err(AcquisitionError::InvalidChannelCount);
        }
        if !(settings.scan_rate_hz > 0.0) {
            return Err(AcquisitionError::InvalidScanRate(settings.scan_rate_hz));
        }
        let rng = StdRng::seed_from_u64(settings.seed);
        let stream_start_ticks = u32::MAX - (Self::TICKS_PER_SECOND / 2.0) as u32;
        Ok(Self {
            settings,
            rng,
            started_at: Instant::now(),
            stream_start_ticks,
            scans_read: 0,
        })
    }
    fn wait_for_block(&self) {
        let due = (self.scans_read + self.settings.scans_per_read as u64) as f64
            / self.settings.scan_rate_hz;
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if due > elapsed {
            thread::sleep(Duration::from_secs_f64(due - elapsed));
        }
    }
    fn generate(&mut self) -> Vec<f64> {
        let channels = self.settings.num_channels;
        let scans = self.settings.scans_per_read;
        let noise = self.settings.noise;
        let mut samples: Vec<f64> = (0..channels * scans)
            .map(|_| self.rng.gen_range(-noise..=noise))
            .collect();
        if scans > 0 && self.rng.gen_bool(self.settings.spike_probability.clamp(0.0, 1.0)) {
            let channel = self.rng.gen_range(0..channels);
            let start = self.rng.gen_range(0..scans);
            let amplitude = self.settings.spike_amplitude * self.rng.gen_range(0.5..=1.0);
            // ~1 ms decay
            let tau = (self.settings.scan_rate_hz / 1000.0).max(1.0);
            for (i, scan) in (start..scans).enumerate() {
                samples[scan * channels + channel] += amplitude * (-(i as f64) / tau).exp();
            }
        }
        let dropout = self.settings.dropout_probability.clamp(0.0, 1.0);
        if dropout > 0.0 {
            for sample in samples.iter_mut() {
                if self.rng.gen_bool(dropout) {
                    *sample = SENTINEL;
                }
            }
        }
        samples
    }
}
impl StreamSource for SimulatedSource {
    fn num_channels(&self) -> usize {
        self.settings.num_channels
    }
    fn actual_scan_rate_hz(&self) -> f64 {
        self.settings.scan_rate_hz
    }
    fn ticks_per_second(&self) -> f64 {
        Self::TICKS_PER_SECOND
    }
    fn read_block(&mut self) -> Result<Option<RawBlock>, AcquisitionError> {
        if self.settings.paced {
            self.wait_for_block();
        }
        let samples = self.generate();
        self.scans_read += self.settings.scans_per_read as u64;
        let behind = self.started_at.elapsed().as_secs_f64() * self.settings.scan_rate_hz
            - self.scans_read as f64;
        Ok(Some(RawBlock::new(samples).with_backlog(behind.max(0.0) as u32, 0)))
    }
    fn read_tick_counter(&mut self) -> Result<u32, AcquisitionError> {
        let ticks = (self.started_at.elapsed().as_secs_f64() * Self::TICKS_PER_SECOND) as u64;
        Ok(self.stream_start_ticks.wrapping_add(ticks as u32))
    }
    fn read_stream_start_ticks(&mut self) -> Result<u32, AcquisitionError> {
        Ok(self.stream_start_ticks)
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn manual_source_replays_blocks_then_failures() {
        let mut source = ManualSource::new(2, 100.0, vec![RawBlock::new(vec![1.0, 2.0])]);
        source.push_failure("usb unplugged");
        assert_eq!(source.remaining(), 2);
        assert_eq!(source.read_block().unwrap().unwrap().samples, vec![1.0, 2.0]);
        assert!(matches!(
            source.read_block(),
            Err(AcquisitionError::Transport(ref m)) if m == "usb unplugged"
        ));
        assert!(source.read_block().unwrap().is_none());
        assert_eq!(source.remaining(), 0);
    }
    #[test]
    fn simulated_blocks_are_whole_scans() {
        let settings = SimulationSettings {
            num_channels: 3,
            scans_per_read: 100,
            scan_rate_hz: 1000.0,
            paced: false,
            spike_probability: 1.0,
            ..Default::default()
        };
        let mut source = SimulatedSource::new(settings).unwrap();
        let block = source.read_block().unwrap().unwrap();
        assert_eq!(block.samples.len(), 300);
        assert!(block.samples.iter().any(|&v| v > 1.0));
    }
    #[test]
    fn simulated_counter_wraps_after_start() {
        let mut source = SimulatedSource::new(SimulationSettings {
            paced: false,
            ..Default::default()
        })
        .unwrap();
        let start = source.read_stream_start_ticks().unwrap();
        assert!(start > u32::MAX - 40_000_000);
        let now = source.read_tick_counter().unwrap();
        let elapsed = crate::drivers::clock::elapsed_seconds(start, now, 40.0e6);
        assert!(elapsed >= 0.0 && elapsed < 5.0);
    }
}
