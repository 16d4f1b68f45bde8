// src/types.rs
use serde::Serialize;

/// Position of a scan within the session. Starts at 0 and grows by one per scan.
pub type ScanIndex = u64;

/// Value the device substitutes for a sample it could not acquire.
pub const SENTINEL: f64 = -9999.0;

pub fn is_sentinel(raw: f64) -> bool {
    raw == SENTINEL
}

// 一次读取得到的原始数据块 (通道交错排列)
#[derive(Clone, Debug, Default)]
pub struct RawBlock {
    /// `samples[k]` belongs to channel `k % channels`.
    pub samples: Vec<f64>,
    /// Scans still waiting in the device buffer after this read.
    pub device_backlog: u32,
    /// Scans buffered on the host side by the driver library.
    pub host_backlog: u32,
}

impl RawBlock {
    pub fn new(samples: Vec<f64>) -> Self {
        Self { samples, ..Default::default() }
    }

    pub fn with_backlog(mut self, device: u32, host: u32) -> Self {
        self.device_backlog = device;
        self.host_backlog = host;
        self
    }
}

// 工程单位样本：采集失败的点不参与换算
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EngineeringSample {
    Value(f64),
    AcquisitionError,
}

impl EngineeringSample {
    pub fn value(self) -> Option<f64> {
        match self {
            EngineeringSample::Value(v) => Some(v),
            EngineeringSample::AcquisitionError => None,
        }
    }

    /// Value used when archiving; failed samples keep the device sentinel.
    pub fn archived(self) -> f64 {
        self.value().unwrap_or(SENTINEL)
    }
}

// 一次完整事件的结果
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct EventRecord {
    pub channel: usize,
    pub peak_value: f64,
    pub peak_timestamp: f64,
}

/// One block after conversion and timestamping, handed to archival sinks.
#[derive(Clone, Debug)]
pub struct ProcessedBlock {
    pub first_scan: ScanIndex,
    pub num_channels: usize,
    pub timestamps: Vec<f64>,
    /// Interleaved exactly like the raw block.
    pub samples: Vec<EngineeringSample>,
}

impl ProcessedBlock {
    pub fn scans(&self) -> impl Iterator<Item = (f64, &[EngineeringSample])> {
        self.timestamps
            .iter()
            .copied()
            .zip(self.samples.chunks(self.num_channels.max(1)))
    }
}

// 停止原因
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    Requested,
    SourceExhausted,
    TransportError,
    ProcessingError,
}
