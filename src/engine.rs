// src/engine.rs
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{bounded, Receiver, Sender};
use log::{debug, error, info, warn};

use crate::drivers::clock::system_now;
use crate::drivers::{
    AcquisitionError, ClockOffset, ClockSynchronizer, IngestionPipeline, PipelineSettings,
    StreamSource, Timeline, TimestampAssigner,
};
use crate::recorder::EventSink;
use crate::types::{EventRecord, RawBlock, StopReason};

#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub pipeline: PipelineSettings,
    /// Maximum number of blocks waiting for the worker.
    pub queue_depth: usize,
    pub clock_calibration_reads: usize,
}

#[derive(Clone, Debug)]
pub struct SessionSummary {
    pub stop_reason: StopReason,
    pub clock_offset: ClockOffset,
    pub scan_rate_hz: f64,
    pub blocks: u64,
    pub scans: u64,
    pub events: u64,
    pub acquisition_errors: Vec<u64>,
    pub peak_device_backlog: u32,
    /// Events whose hold-off had not elapsed when the session ended.
    pub open_events: Vec<EventRecord>,
}

struct ProducerReport {
    reason: StopReason,
    peak_backlog: u32,
    error: Option<AcquisitionError>,
}

struct WorkerReport {
    pipeline: IngestionPipeline,
    events: u64,
    error: Option<AcquisitionError>,
}

/// Runs one acquisition session until `stop` is raised, the source runs dry,
/// or something fails.
///
/// The calling thread reads blocks; a single worker processes them in arrival
/// order through a queue of `queue_depth` blocks. However the loop ends, the
/// worker drains what was queued and is joined before this returns, and the
/// source is dropped on the way out.
pub fn run_session<S, K>(
    mut source: S,
    settings: SessionSettings,
    sink: K,
    stop: &AtomicBool,
) -> Result<SessionSummary, AcquisitionError>
where
    S: StreamSource,
    K: EventSink + Send,
{
    let channels = source.num_channels();
    if channels != settings.pipeline.transforms.len() {
        return Err(AcquisitionError::ChannelMismatch {
            expected: settings.pipeline.transforms.len(),
            actual: channels,
        });
    }
    let scan_rate_hz = source.actual_scan_rate_hz();
    let offset = synchronize_clock(&mut source, settings.clock_calibration_reads)?;
    let assigner = TimestampAssigner::new(offset, scan_rate_hz)?;
    let pipeline = IngestionPipeline::new(settings.pipeline, assigner, Arc::new(Timeline::new()))?;
    info!(
        "🌊 Stream started: {} channels at {:.3} Hz, wall origin {:.6}",
        channels, scan_rate_hz, offset.wall_origin_seconds
    );

    let (producer, worker) = thread::scope(|scope| {
        let (tx, rx) = bounded::<RawBlock>(settings.queue_depth.max(1));
        let worker = scope.spawn(move || process_blocks(pipeline, rx, sink));
        let producer = read_blocks(&mut source, tx, stop);
        (producer, worker.join())
    });
    let worker = worker.map_err(|_| AcquisitionError::WorkerPanicked)?;

    let detector = worker.pipeline.detector();
    let summary = SessionSummary {
        stop_reason: if worker.error.is_some() {
            StopReason::ProcessingError
        } else {
            producer.reason
        },
        clock_offset: offset,
        scan_rate_hz,
        blocks: worker.pipeline.blocks_processed(),
        scans: worker.pipeline.cursor(),
        events: worker.events,
        acquisition_errors: detector.error_counts(),
        peak_device_backlog: producer.peak_backlog,
        open_events: detector.open_events(),
    };
    for open in &summary.open_events {
        warn!(
            "channel {} still above threshold at shutdown (peak {:.4} at {:.6})",
            open.channel, open.peak_value, open.peak_timestamp
        );
    }
    info!(
        "🛑 Stream stopped ({:?}): {} blocks, {} scans, {} events, {} acquisition errors",
        summary.stop_reason,
        summary.blocks,
        summary.scans,
        summary.events,
        summary.acquisition_errors.iter().sum::<u64>()
    );
    if let Some(e) = worker.error {
        return Err(e);
    }
    if let Some(e) = producer.error {
        return Err(e);
    }
    Ok(summary)
}

fn synchronize_clock<S: StreamSource>(
    source: &mut S,
    calibration_reads: usize,
) -> Result<ClockOffset, AcquisitionError> {
    let as_sync_error = |e: AcquisitionError| match e {
        AcquisitionError::ClockSync(_) => e,
        other => AcquisitionError::ClockSync(other.to_string()),
    };
    let sync = ClockSynchronizer::new(source.ticks_per_second())?;
    let start_ticks = source.read_stream_start_ticks().map_err(as_sync_error)?;
    let offset = sync
        .synchronize(start_ticks, || source.read_tick_counter(), system_now)
        .map_err(as_sync_error)?;
    if calibration_reads > 0 {
        let averaged = sync
            .calibrate(calibration_reads, || source.read_tick_counter(), system_now)
            .map_err(as_sync_error)?;
        let single = offset.wall_origin_seconds
            - f64::from(offset.hardware_origin_ticks) / offset.ticks_per_second;
        debug!(
            "clock offset over {} reads: {:.6} (single read {:.6}, diff {:+.3} ms)",
            calibration_reads,
            averaged,
            single,
            (averaged - single) * 1000.0
        );
    }
    Ok(offset)
}

fn read_blocks<S: StreamSource>(
    source: &mut S,
    tx: Sender<RawBlock>,
    stop: &AtomicBool,
) -> ProducerReport {
    let mut report = ProducerReport {
        reason: StopReason::Requested,
        peak_backlog: 0,
        error: None,
    };
    while !stop.load(Ordering::SeqCst) {
        match source.read_block() {
            Ok(Some(block)) => {
                if block.device_backlog > report.peak_backlog {
                    warn!(
                        "device backlog grew to {} scans (host {})",
                        block.device_backlog, block.host_backlog
                    );
                    report.peak_backlog = block.device_backlog;
                }
                if tx.send(block).is_err() {
                    // worker is gone; its report carries the cause
                    report.reason = StopReason::ProcessingError;
                    return report;
                }
            }
            Ok(None) => {
                report.reason = StopReason::SourceExhausted;
                return report;
            }
            Err(e) => {
                error!("❌ stream read failed: {e}");
                report.reason = StopReason::TransportError;
                report.error = Some(e);
                return report;
            }
        }
    }
    report
}

fn process_blocks<K: EventSink>(
    mut pipeline: IngestionPipeline,
    rx: Receiver<RawBlock>,
    mut sink: K,
) -> WorkerReport {
    let mut events = 0u64;
    let mut failure = None;
    for raw in rx.iter() {
        let result = pipeline.on_block(&raw).and_then(|outcome| {
            if outcome.acquisition_errors > 0 {
                debug!(
                    "{} acquisition errors in block starting at scan {}",
                    outcome.acquisition_errors, outcome.processed.first_scan
                );
            }
            sink.on_block(&outcome.processed)?;
            for event in &outcome.events {
                sink.on_event(event)?;
                events += 1;
            }
            Ok(())
        });
        if let Err(e) = result {
            error!("❌ block processing failed: {e}");
            failure = Some(e);
            break;
        }
    }
    drop(rx);
    if let Err(e) = sink.finish() {
        error!("❌ failed to finish output: {e}");
        failure.get_or_insert(e);
    }
    WorkerReport {
        pipeline,
        events,
        error: failure,
    }
}

/// Stop flag for a session, shared with signal handlers or timers.
pub fn stop_flag() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}
