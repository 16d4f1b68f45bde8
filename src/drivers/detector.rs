//! Per-channel threshold event detection with a hold-off period.
//!
//! A channel opens an event on the first sample strictly above its threshold
//! and follows the running maximum while the event lasts. The event closes on a
//! sample at or below the threshold taken more than `buffer_period` seconds
//! after the current peak; shorter dips leave it open. Updates depend on the
//! order samples arrive in, so each channel rejects a scan that does not come
//! after the previous one.
use crate::drivers::timeline::TimeLookup;
use crate::drivers::AcquisitionError;
use crate::types::{EngineeringSample, EventRecord, ScanIndex};
#[derive(Clone, Copy, Debug)]
pub struct ChannelState {
    threshold: f64,
    running_max: f64,
    spike_timestamp: f64,
    in_event: bool,
    last_scan: Option<ScanIndex>,
    acquisition_errors: u64,
}
impl ChannelState {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            running_max: 0.0,
            spike_timestamp: 0.0,
            in_event: false,
            last_scan: None,
            acquisition_errors: 0,
        }
    }
    pub fn in_event(&self) -> bool {
        self.in_event
    }
    pub fn running_max(&self) -> f64 {
        self.running_max
    }
    pub fn spike_timestamp(&self) -> f64 {
        self.spike_timestamp
    }
    pub fn acquisition_errors(&self) -> u64 {
        self.acquisition_errors
    }
    pub fn last_scan(&self) -> Option<ScanIndex> {
        self.last_scan
    }
    pub fn process<T: TimeLookup + ?Sized>(
        &mut self,
        channel: usize,
        sample: EngineeringSample,
        scan: ScanIndex,
        buffer_period: f64,
        timeline: &T,
    ) -> Result<Option<EventRecord>, AcquisitionError> {
        if let Some(last) = self.last_scan {
            if scan <= last {
                return Err(AcquisitionError::OutOfOrderScan {
                    channel,
                    last,
                    got: scan,
                });
            }
        }
        let value = match sample {
            EngineeringSample::Value(v) => v,
            EngineeringSample::AcquisitionError => {
                self.acquisition_errors += 1;
                self.last_scan = Some(scan);
                return Ok(None);
            }
        };
        let mut emitted = None;
        if value > self.threshold {
            if !self.in_event || value > self.running_max {
                let ts = timeline.timestamp(scan)?;
                self.in_event = true;
                self.running_max = value;
                self.spike_timestamp = ts;
            }
        } else if self.in_event {
            let ts = timeline.timestamp(scan)?;
            if ts - self.spike_timestamp > buffer_period {
                emitted = Some(EventRecord {
                    channel,
                    peak_value: self.running_max,
                    peak_timestamp: self.spike_timestamp,
                });
                self.running_max = 0.0;
                self.in_event = false;
            }
        }
        self.last_scan = Some(scan);
        Ok(emitted)
    }
    /// Feeds one channel's consecutive samples starting at `first_scan`,
    /// appending closed events to `out`.
    pub fn process_run<T, I>(
        &mut self,
        channel: usize,
        first_scan: ScanIndex,
        samples: I,
        buffer_period: f64,
        timeline: &T,
        out: &mut Vec<EventRecord>,
    ) -> Result<(), AcquisitionError>
    where
        T: TimeLookup + ?Sized,
        I: IntoIterator<Item = EngineeringSample>,
    {
        for (scan, sample) in (first_scan..).zip(samples) {
            if let Some(event) = self.process(channel, sample, scan, buffer_period, timeline)? {
                out.push(event);
            }
        }
        Ok(())
    }
}
/// Independent state machines, one per channel, indexed by channel id.
#[derive(Clone, Debug)]
pub struct EventDetector {
    channels: Vec<ChannelState>,
    buffer_period: f64,
}
impl EventDetector {
    pub fn new(
        thresholds: impl IntoIterator<Item = f64>,
        buffer_period: f64,
    ) -> Result<Self, AcquisitionError> {
        let channels: Vec<ChannelState> = thresholds.into_iter().map(ChannelState::new).collect();
        if channels.is_empty() {
            return Err(AcquisitionError::InvalidChannelCount);
        }
        Ok(Self {
            channels,
            buffer_period,
        })
    }
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }
    pub fn buffer_period(&self) -> f64 {
        self.buffer_period
    }
    pub fn channel(&self, channel: usize) -> Option<&ChannelState> {
        self.channels.get(channel)
    }
    pub fn process<T: TimeLookup + ?Sized>(
        &mut self,
        channel: usize,
        sample: EngineeringSample,
        scan: ScanIndex,
        timeline: &T,
    ) -> Result<Option<EventRecord>, AcquisitionError> {
        let count = self.channels.len();
        let buffer_period = self.buffer_period;
        self.channels
            .get_mut(channel)
            .ok_or(AcquisitionError::UnknownChannel { channel, count })?
            .process(channel, sample, scan, buffer_period, timeline)
    }
    /// Mutable access to every channel at once, so callers can hand each
    /// channel to its own worker.
    pub fn channels_mut(&mut self) -> &mut [ChannelState] {
        &mut self.channels
    }
    pub fn error_counts(&self) -> Vec<u64> {
        self.channels.iter().map(|c| c.acquisition_errors).collect()
    }
    pub fn total_errors(&self) -> u64 {
        self.channels.iter().map(|c| c.acquisition_errors).sum()
    }
    /// Events still waiting for their hold-off period to elapse.
    pub fn open_events(&self) -> Vec<EventRecord> {
        self.channels
            .iter()
            .enumerate()
            .filter(|(_, c)| c.in_event)
            .map(|(channel, c)| EventRecord {
                channel,
                peak_value: c.running_max,
                peak_timestamp: c.spike_timestamp,
            })
            .collect()
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::clock::ClockOffset;
    use crate::drivers::timeline::Timeline;
    use crate::drivers::timestamp::TimestampAssigner;
    use crate::types::EngineeringSample::{AcquisitionError as Missing, Value};
    const RATE: f64 = 1000.0;
    fn assigner() -> TimestampAssigner {
        let offset = ClockOffset {
            hardware_origin_ticks: 0,
            wall_origin_seconds: 1_700_000_000.0,
            ticks_per_second: 40.0e6,
        };
        TimestampAssigner::new(offset, RATE).unwrap()
    }
    fn timeline(scans: usize) -> Timeline {
        let timeline = Timeline::new();
        timeline
            .extend(&assigner().block_timestamps(0, scans))
            .unwrap();
        timeline
    }
    /// Feeds `values` to channel 0 from scan 0 and returns (scan, event) pairs.
    fn run(detector: &mut EventDetector, values: &[f64], timeline: &Timeline) -> Vec<(u64, EventRecord)> {
        let mut events = Vec::new();
        for (scan, &v) in values.iter().enumerate() {
            if let Some(e) = detector.process(0, Value(v), scan as u64, timeline).unwrap() {
                events.push((scan as u64, e));
            }
        }
        events
    }
    #[test]
    fn single_spike_reports_peak_after_hold_off() {
        let mut values = vec![0.1, 0.9, 1.2, 0.95, 0.4, 0.4, 0.4, 0.4, 0.4, 0.4];
        let timeline = timeline(100);
        let mut detector = EventDetector::new([0.5], 0.05).unwrap();
        assert!(run(&mut detector, &values, &timeline).is_empty());
        assert!(detector.channel(0).unwrap().in_event());
        values.resize(100, 0.4);
        let mut detector = EventDetector::new([0.5], 0.05).unwrap();
        let events = run(&mut detector, &values, &timeline);
        assert_eq!(events.len(), 1);
        let (closed_at, event) = events[0];
        assert_eq!(event.channel, 0);
        assert_eq!(event.peak_value, 1.2);
        assert_eq!(event.peak_timestamp, assigner().timestamp_for(2));
        // 50 scans past the peak is the hold-off boundary at 1 kHz.
        assert!((52..=53).contains(&closed_at), "closed at scan {closed_at}");
        let state = detector.channel(0).unwrap();
        assert!(!state.in_event());
        assert_eq!(state.running_max(), 0.0);
    }
    #[test]
    fn sample_equal_to_threshold_does_not_open_an_event() {
        let timeline = timeline(10);
        let mut detector = EventDetector::new([0.5], 0.05).unwrap();
        run(&mut detector, &[0.5, 0.5, 0.5], &timeline);
        assert!(!detector.channel(0).unwrap().in_event());
    }
    #[test]
    fn short_dip_keeps_event_open_and_max_tracks_recrossing() {
        let timeline = timeline(200);
        let mut values = vec![0.9];
        values.extend(std::iter::repeat(0.3).take(20));
        values.push(1.5);
        values.extend(std::iter::repeat(0.3).take(100));
        let mut detector = EventDetector::new([0.5], 0.05).unwrap();
        let events = run(&mut detector, &values[..21], &timeline);
        assert!(events.is_empty());
        let state = detector.channel(0).unwrap();
        assert!(state.in_event());
        assert_eq!(state.running_max(), 0.9);
        let mut detector = EventDetector::new([0.5], 0.05).unwrap();
        let events = run(&mut detector, &values, &timeline);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1.peak_value, 1.5);
        assert_eq!(events[0].1.peak_timestamp, assigner().timestamp_for(21));
        assert!(events[0].0 > 70);
    }
    #[test]
    fn recrossing_below_the_peak_does_not_move_it() {
        let timeline = timeline(200);
        let mut values = vec![0.9];
        values.extend(std::iter::repeat(0.3).take(20));
        values.push(0.7);
        values.extend(std::iter::repeat(0.3).take(100));
        let mut detector = EventDetector::new([0.5], 0.05).unwrap();
        let events = run(&mut detector, &values, &timeline);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1.peak_value, 0.9);
        assert_eq!(events[0].1.peak_timestamp, assigner().timestamp_for(0));
    }
    #[test]
    fn consecutive_events_are_reported_separately() {
        let timeline = timeline(400);
        let mut values = vec![2.0];
        values.extend(std::iter::repeat(0.0).take(99));
        values.push(3.0);
        values.extend(std::iter::repeat(0.0).take(99));
        let mut detector = EventDetector::new([1.0], 0.01).unwrap();
        let events = run(&mut detector, &values, &timeline);
        let peaks: Vec<f64> = events.iter().map(|(_, e)| e.peak_value).collect();
        assert_eq!(peaks, vec![2.0, 3.0]);
    }
    #[test]
    fn sentinel_is_counted_and_never_compared() {
        let timeline = timeline(200);
        let mut detector = EventDetector::new([0.5], 0.05).unwrap();
        // Idle: a failed sample must not open an event.
        assert!(detector.process(0, Missing, 0, &timeline).unwrap().is_none());
        assert!(!detector.channel(0).unwrap().in_event());
        detector.process(0, Value(0.8), 1, &timeline).unwrap();
        // Active: failures neither raise the peak nor close the event.
        for scan in 2..150 {
            assert!(detector.process(0, Missing, scan, &timeline).unwrap().is_none());
        }
        let state = detector.channel(0).unwrap();
        assert!(state.in_event());
        assert_eq!(state.running_max(), 0.8);
        assert_eq!(state.spike_timestamp(), assigner().timestamp_for(1));
        assert_eq!(detector.error_counts(), vec![149]);
        let event = detector
            .process(0, Value(0.1), 150, &timeline)
            .unwrap()
            .expect("valid low sample closes the event");
        assert_eq!(event.peak_value, 0.8);
    }
    #[test]
    fn reversed_blocks_are_detected() {
        let timeline = timeline(20);
        let first: Vec<f64> = vec![0.6, 0.8, 1.0, 0.9, 0.7];
        let second: Vec<f64> = vec![0.75, 0.95, 0.85, 0.65, 0.6];
        let mut in_order = EventDetector::new([0.5], 0.05).unwrap();
        let mut out = Vec::new();
        let ch = &mut in_order.channels_mut()[0];
        ch.process_run(0, 0, first.iter().map(|&v| Value(v)), 0.05, &timeline, &mut out)
            .unwrap();
        ch.process_run(0, 5, second.iter().map(|&v| Value(v)), 0.05, &timeline, &mut out)
            .unwrap();
        assert_eq!(ch.running_max(), 1.0);
        assert_eq!(ch.spike_timestamp(), assigner().timestamp_for(2));
        let mut reversed = EventDetector::new([0.5], 0.05).unwrap();
        let ch = &mut reversed.channels_mut()[0];
        ch.process_run(0, 5, second.iter().map(|&v| Value(v)), 0.05, &timeline, &mut out)
            .unwrap();
        // Without the ordering check the second block's peak would win here.
        assert_eq!(ch.running_max(), 0.95);
        let err = ch
            .process_run(0, 0, first.iter().map(|&v| Value(v)), 0.05, &timeline, &mut out)
            .unwrap_err();
        assert!(matches!(
            err,
            AcquisitionError::OutOfOrderScan { channel: 0, last: 9, got: 0 }
        ));
    }
    #[test]
    fn channels_are_independent() {
        let timeline = timeline(10);
        let mut detector = EventDetector::new([0.5, 5.0], 0.05).unwrap();
        detector.process(0, Value(1.0), 0, &timeline).unwrap();
        detector.process(1, Value(1.0), 0, &timeline).unwrap();
        assert!(detector.channel(0).unwrap().in_event());
        assert!(!detector.channel(1).unwrap().in_event());
        assert_eq!(detector.open_events().len(), 1);
        assert!(matches!(
            detector.process(2, Value(1.0), 0, &timeline),
            Err(AcquisitionError::UnknownChannel { channel: 2, count: 2 })
        ));
    }
    #[test]
    fn lookup_past_timeline_is_not_swallowed() {
        let timeline = timeline(3);
        let mut detector = EventDetector::new([0.5], 0.05).unwrap();
        assert!(matches!(
            detector.process(0, Value(1.0), 5, &timeline),
            Err(AcquisitionError::TimestampOutOfRange { requested: 5, len: 3 })
        ));
    }
}
