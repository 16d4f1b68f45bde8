use std::sync::Arc;
use std::thread;
use crate::drivers::detector::{ChannelState, EventDetector};
use crate::drivers::error::AcquisitionError;
use crate::drivers::timeline::{TimeLookup, Timeline, TimelineView};
use crate::drivers::timestamp::TimestampAssigner;
use crate::drivers::units::{BlockConverter, UnitTransform};
use crate::types::{EngineeringSample, EventRecord, ProcessedBlock, RawBlock, ScanIndex};
/// How channel detection is scheduled inside one block. Blocks themselves are
/// always processed one after another.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectionMode {
    Sequential,
    /// One scoped worker per channel, all joined before the block completes.
    PerChannel,
}
#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub transforms: Vec<UnitTransform>,
    pub thresholds: Vec<f64>,
    /// Hold-off period in seconds.
    pub buffer_period: f64,
    pub mode: DetectionMode,
}
/// Everything one block produced.
#[derive(Clone, Debug)]
pub struct BlockOutcome {
    pub processed: ProcessedBlock,
    /// Closed events, ordered by peak time.
    pub events: Vec<EventRecord>,
    pub acquisition_errors: u64,
}
/// Raw block in, converted samples, timeline entries and events out.
pub struct IngestionPipeline {
    converter: BlockConverter,
    assigner: TimestampAssigner,
    timeline: Arc<Timeline>,
    detector: EventDetector,
    mode: DetectionMode,
    cursor: ScanIndex,
    blocks: u64,
}
impl IngestionPipeline {
    pub fn new(
        settings: PipelineSettings,
        assigner: TimestampAssigner,
        timeline: Arc<Timeline>,
    ) -> Result<Self, AcquisitionError> {
        if settings.transforms.len() != settings.thresholds.len() {
            return Err(AcquisitionError::ChannelMismatch {
                expected: settings.transforms.len(),
                actual: settings.thresholds.len(),
            });
        }
        let converter = BlockConverter::new(settings.transforms)?;
        let detector = EventDetector::new(settings.thresholds, settings.buffer_period)?;
        let cursor = timeline.len();
        Ok(Self {
            converter,
            assigner,
            timeline,
            detector,
            mode: settings.mode,
            cursor,
            blocks: 0,
        })
    }
    pub fn num_channels(&self) -> usize {
        self.converter.num_channels()
    }
    /// Index the next block's first scan will get.
    pub fn cursor(&self) -> ScanIndex {
        self.cursor
    }
    pub fn blocks_processed(&self) -> u64 {
        self.blocks
    }
    pub fn timeline(&self) -> &Arc<Timeline> {
        &self.timeline
    }
    pub fn detector(&self) -> &EventDetector {
        &self.detector
    }
    pub fn assigner(&self) -> &TimestampAssigner {
        &self.assigner
    }
    /// Processes one block end to end. Detection reads the block's own
    /// timestamps; the timeline and the scan cursor only move once every
    /// channel has accepted the block. On any error the channel states are
    /// restored, so nothing reflects a block that was not fully processed.
    pub fn on_block(&mut self, raw: &RawBlock) -> Result<BlockOutcome, AcquisitionError> {
        let channels = self.converter.num_channels();
        let samples = self.converter.convert(&raw.samples)?;
        let scans = samples.len() / channels;
        let first_scan = self.cursor;
        let timestamps = self.assigner.block_timestamps(first_scan, scans);
        let errors_before = self.detector.total_errors();
        let snapshot = self.detector.channels_mut().to_vec();
        let result = self.detect(&samples, first_scan, &timestamps).and_then(|events| {
            self.timeline.extend(&timestamps)?;
            Ok(events)
        });
        let mut events = match result {
            Ok(events) => events,
            Err(e) => {
                self.detector.channels_mut().copy_from_slice(&snapshot);
                return Err(e);
            }
        };
        events.sort_by(|a, b| {
            a.peak_timestamp
                .total_cmp(&b.peak_timestamp)
                .then(a.channel.cmp(&b.channel))
        });
        self.cursor += scans as u64;
        self.blocks += 1;
        Ok(BlockOutcome {
            processed: ProcessedBlock {
                first_scan,
                num_channels: channels,
                timestamps,
                samples,
            },
            events,
            acquisition_errors: self.detector.total_errors() - errors_before,
        })
    }
    fn detect(
        &mut self,
        samples: &[EngineeringSample],
        first_scan: ScanIndex,
        timestamps: &[f64],
    ) -> Result<Vec<EventRecord>, AcquisitionError> {
        let lookup = BlockLookup {
            committed: self.timeline.view(),
            first_scan,
            timestamps,
        };
        let buffer_period = self.detector.buffer_period();
        let states = self.detector.channels_mut();
        match self.mode {
            DetectionMode::Sequential => {
                detect_sequential(states, samples, first_scan, buffer_period, &lookup)
            }
            DetectionMode::PerChannel => {
                detect_per_channel(states, samples, first_scan, buffer_period, &lookup)
            }
        }
    }
}
/// Committed timeline for earlier scans, the block being processed for the rest.
struct BlockLookup<'a> {
    committed: TimelineView<'a>,
    first_scan: ScanIndex,
    timestamps: &'a [f64],
}
impl TimeLookup for BlockLookup<'_> {
    fn timestamp(&self, scan: ScanIndex) -> Result<f64, AcquisitionError> {
        if scan < self.first_scan {
            return self.committed.timestamp(scan);
        }
        usize::try_from(scan - self.first_scan)
            .ok()
            .and_then(|idx| self.timestamps.get(idx).copied())
            .ok_or(AcquisitionError::TimestampOutOfRange {
                requested: scan,
                len: self.first_scan + self.timestamps.len() as u64,
            })
    }
}
fn column(
    samples: &[EngineeringSample],
    channel: usize,
    channels: usize,
) -> impl Iterator<Item = EngineeringSample> + '_ {
    samples.iter().skip(channel).step_by(channels).copied()
}
fn detect_sequential<T: TimeLookup + ?Sized>(
    states: &mut [ChannelState],
    samples: &[EngineeringSample],
    first_scan: ScanIndex,
    buffer_period: f64,
    timeline: &T,
) -> Result<Vec<EventRecord>, AcquisitionError> {
    let channels = states.len();
    let mut events = Vec::new();
    for (channel, state) in states.iter_mut().enumerate() {
        state.process_run(
            channel,
            first_scan,
            column(samples, channel, channels),
            buffer_period,
            timeline,
            &mut events,
        )?;
    }
    Ok(events)
}
fn detect_per_channel<T: TimeLookup + Sync + ?Sized>(
    states: &mut [ChannelState],
    samples: &[EngineeringSample],
    first_scan: ScanIndex,
    buffer_period: f64,
    timeline: &T,
) -> Result<Vec<EventRecord>, AcquisitionError> {
    let channels = states.len();
    thread::scope(|scope| {
        let workers: Vec<_> = states
            .iter_mut()
            .enumerate()
            .map(|(channel, state)| {
                scope.spawn(move || {
                    let mut out = Vec::new();
                    state
                        .process_run(
                            channel,
                            first_scan,
                            column(samples, channel, channels),
                            buffer_period,
                            timeline,
                            &mut out,
                        )
                        .map(|()| out)
                })
            })
            .collect();
        let mut events = Vec::new();
        let mut first_error = None;
        for worker in workers {
            match worker.join() {
                Ok(Ok(out)) => events.extend(out),
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(_) => {
                    first_error.get_or_insert(AcquisitionError::WorkerPanicked);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(events),
        }
    })
}
/// Lightweight helper to interleave per-channel samples into a raw block.
pub fn interleave(channels: &[Vec<f64>]) -> RawBlock {
    let scans = channels.iter().map(Vec::len).min().unwrap_or(0);
    let mut samples = Vec::with_capacity(scans * channels.len());
    for scan in 0..scans {
        samples.extend(channels.iter().map(|c| c[scan]));
    }
    RawBlock::new(samples)
}
