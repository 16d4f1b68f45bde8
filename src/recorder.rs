// src/recorder.rs
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use csv::{StringRecord, Writer, WriterBuilder};
use log::info;
use parking_lot::Mutex;

use crate::config::AppConfig;
use crate::drivers::AcquisitionError;
use crate::types::{EventRecord, ProcessedBlock};

/// Consumer of what the acquisition core produces.
pub trait EventSink {
    /// Converted, timestamped samples of one block, for archival.
    fn on_block(&mut self, _block: &ProcessedBlock) -> Result<(), AcquisitionError> {
        Ok(())
    }

    fn on_event(&mut self, event: &EventRecord) -> Result<(), AcquisitionError>;

    fn finish(&mut self) -> Result<(), AcquisitionError> {
        Ok(())
    }
}

impl<T: EventSink + ?Sized> EventSink for Box<T> {
    fn on_block(&mut self, block: &ProcessedBlock) -> Result<(), AcquisitionError> {
        (**self).on_block(block)
    }

    fn on_event(&mut self, event: &EventRecord) -> Result<(), AcquisitionError> {
        (**self).on_event(event)
    }

    fn finish(&mut self) -> Result<(), AcquisitionError> {
        (**self).finish()
    }
}

// 事件 CSV 与采样 CSV，两者均可选
pub struct CsvRecorder {
    events: Option<Writer<File>>,
    samples: Option<Writer<File>>,
    row: StringRecord,
}

impl CsvRecorder {
    pub fn create(
        events_path: Option<&Path>,
        samples_path: Option<&Path>,
        num_channels: usize,
    ) -> Result<Self, AcquisitionError> {
        let events = match events_path {
            Some(path) => {
                let mut w = WriterBuilder::new().has_headers(false).from_path(path)?;
                w.write_record(["channel", "peak_value", "peak_timestamp"])?;
                info!("💾 Recording events to {}", path.display());
                Some(w)
            }
            None => None,
        };
        let samples = match samples_path {
            Some(path) => {
                let mut w = WriterBuilder::new().has_headers(false).from_path(path)?;
                let mut header = vec!["timestamp".to_string()];
                header.extend((0..num_channels).map(|c| format!("ch{c}")));
                w.write_record(&header)?;
                info!("💾 Archiving samples to {}", path.display());
                Some(w)
            }
            None => None,
        };
        Ok(Self {
            events,
            samples,
            row: StringRecord::new(),
        })
    }
}

impl EventSink for CsvRecorder {
    fn on_block(&mut self, block: &ProcessedBlock) -> Result<(), AcquisitionError> {
        let Some(w) = &mut self.samples else {
            return Ok(());
        };
        for (timestamp, scan) in block.scans() {
            self.row.clear();
            self.row.push_field(&format!("{timestamp:.6}"));
            for sample in scan {
                self.row.push_field(&sample.archived().to_string());
            }
            w.write_record(&self.row)?;
        }
        Ok(())
    }

    fn on_event(&mut self, event: &EventRecord) -> Result<(), AcquisitionError> {
        if let Some(w) = &mut self.events {
            w.serialize(event)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), AcquisitionError> {
        if let Some(w) = &mut self.events {
            w.flush()?;
        }
        if let Some(w) = &mut self.samples {
            w.flush()?;
        }
        info!("💾 Recording saved.");
        Ok(())
    }
}

/// Console reporting plus whichever CSV outputs the config names.
pub fn output_sinks(config: &AppConfig) -> Result<FanOut, AcquisitionError> {
    let sinks = FanOut::new().with(LogSink);
    if config.events_path.is_none() && config.samples_path.is_none() {
        return Ok(sinks);
    }
    Ok(sinks.with(CsvRecorder::create(
        config.events_path.as_deref(),
        config.samples_path.as_deref(),
        config.num_channels,
    )?))
}

/// Console reporting.
pub struct LogSink;

impl EventSink for LogSink {
    fn on_event(&mut self, event: &EventRecord) -> Result<(), AcquisitionError> {
        info!(
            "⚡ channel {} peak {:.4} at {:.6}",
            event.channel, event.peak_value, event.peak_timestamp
        );
        Ok(())
    }
}

/// Forwards everything to several sinks, in order.
#[derive(Default)]
pub struct FanOut {
    sinks: Vec<Box<dyn EventSink + Send>>,
}

impl FanOut {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl EventSink + Send + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl EventSink for FanOut {
    fn on_block(&mut self, block: &ProcessedBlock) -> Result<(), AcquisitionError> {
        self.sinks.iter_mut().try_for_each(|s| s.on_block(block))
    }

    fn on_event(&mut self, event: &EventRecord) -> Result<(), AcquisitionError> {
        self.sinks.iter_mut().try_for_each(|s| s.on_event(event))
    }

    fn finish(&mut self) -> Result<(), AcquisitionError> {
        self.sinks.iter_mut().try_for_each(|s| s.finish())
    }
}

#[derive(Debug, Default)]
pub struct Collected {
    pub events: Vec<EventRecord>,
    pub blocks: Vec<ProcessedBlock>,
    pub finished: bool,
}

/// Keeps everything in memory; clones share the same storage.
#[derive(Clone, Default)]
pub struct CollectingSink {
    inner: Arc<Mutex<Collected>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EventRecord> {
        self.inner.lock().events.clone()
    }

    pub fn block_count(&self) -> usize {
        self.inner.lock().blocks.len()
    }

    pub fn scan_count(&self) -> usize {
        self.inner.lock().blocks.iter().map(|b| b.timestamps.len()).sum()
    }

    pub fn is_finished(&self) -> bool {
        self.inner.lock().finished
    }
}

impl EventSink for CollectingSink {
    fn on_block(&mut self, block: &ProcessedBlock) -> Result<(), AcquisitionError> {
        self.inner.lock().blocks.push(block.clone());
        Ok(())
    }

    fn on_event(&mut self, event: &EventRecord) -> Result<(), AcquisitionError> {
        self.inner.lock().events.push(*event);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), AcquisitionError> {
        self.inner.lock().finished = true;
        Ok(())
    }
}
