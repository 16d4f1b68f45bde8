use thiserror::Error;
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("scan rate must be greater than zero, got {0}")]
    InvalidScanRate(f64),
    #[error("channel count must be greater than zero")]
    InvalidChannelCount,
    #[error("channel {channel} has a zero sensitivity")]
    InvalidSensitivity { channel: usize },
    #[error("channel count mismatch: expected {expected}, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },
    #[error("block of {len} samples is not a whole number of {channels}-channel scans")]
    BlockShape { len: usize, channels: usize },
    #[error("out-of-range timestamp request: scan {requested}, timeline holds {len}")]
    TimestampOutOfRange { requested: u64, len: u64 },
    #[error("timeline must be strictly increasing: {previous} followed by {next}")]
    NonMonotonicTimeline { previous: f64, next: f64 },
    #[error("channel {channel} received scan {got} after scan {last}")]
    OutOfOrderScan { channel: usize, last: u64, got: u64 },
    #[error("channel {channel} is not configured (have {count})")]
    UnknownChannel { channel: usize, count: usize },
    #[error("clock synchronization failed: {0}")]
    ClockSync(String),
    #[error("stream transport failure: {0}")]
    Transport(String),
    #[error("processing worker panicked")]
    WorkerPanicked,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}
