use crate::drivers::clock::ClockOffset;
use crate::drivers::AcquisitionError;
use crate::types::ScanIndex;
/// Absolute wall time of a scan: the synchronized origin plus `scan / rate`.
pub fn timestamp_for(scan: ScanIndex, scan_rate_hz: f64, offset: &ClockOffset) -> f64 {
    offset.wall_origin_seconds + scan as f64 / scan_rate_hz
}
/// Assigns timestamps for one session using the device-reported scan rate
/// captured when the stream started.
#[derive(Clone, Copy, Debug)]
pub struct TimestampAssigner {
    offset: ClockOffset,
    scan_rate_hz: f64,
}
impl TimestampAssigner {
    pub fn new(offset: ClockOffset, scan_rate_hz: f64) -> Result<Self, AcquisitionError> {
        if !(scan_rate_hz > 0.0) || !scan_rate_hz.is_finite() {
            return Err(AcquisitionError::InvalidScanRate(scan_rate_hz));
        }
        Ok(Self {
            offset,
            scan_rate_hz,
        })
    }
    pub fn offset(&self) -> &ClockOffset {
        &self.offset
    }
    pub fn scan_rate_hz(&self) -> f64 {
        self.scan_rate_hz
    }
    pub fn timestamp_for(&self, scan: ScanIndex) -> f64 {
        timestamp_for(scan, self.scan_rate_hz, &self.offset)
    }
    /// Timestamps for `count` consecutive scans starting at `first_scan`.
    pub fn block_timestamps(&self, first_scan: ScanIndex, count: usize) -> Vec<f64> {
        (first_scan..first_scan + count as u64)
            .map(|scan| self.timestamp_for(scan))
            .collect()
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    fn offset() -> ClockOffset {
        ClockOffset {
            hardware_origin_ticks: 0xFFFF_0000,
            wall_origin_seconds: 1_700_000_000.25,
            ticks_per_second: 40.0e6,
        }
    }
    #[test]
    fn timestamps_strictly_increase() {
        let assigner = TimestampAssigner::new(offset(), 30_000.0).unwrap();
        let mut previous = assigner.timestamp_for(0);
        for scan in 1..200_000 {
            let ts = assigner.timestamp_for(scan);
            assert!(ts > previous, "scan {scan}: {ts} <= {previous}");
            previous = ts;
        }
    }
    #[test]
    fn timestamp_is_pure_and_matches_formula() {
        let o = offset();
        assert_eq!(timestamp_for(1234, 1000.0, &o), timestamp_for(1234, 1000.0, &o));
        assert!((timestamp_for(1500, 1000.0, &o) - (o.wall_origin_seconds + 1.5)).abs() < 1e-6);
    }
    #[test]
    fn block_timestamps_continue_the_session_sequence() {
        let assigner = TimestampAssigner::new(offset(), 1000.0).unwrap();
        let block = assigner.block_timestamps(10, 5);
        assert_eq!(block.len(), 5);
        for (i, ts) in block.iter().enumerate() {
            assert_eq!(*ts, assigner.timestamp_for(10 + i as u64));
        }
    }
    #[test]
    fn actual_rate_may_differ_from_requested() {
        // Devices round the requested rate; the reported rate is used as-is.
        let assigner = TimestampAssigner::new(offset(), 29_999.4).unwrap();
        let one_second = assigner.timestamp_for(29_999) - assigner.timestamp_for(0);
        assert!(one_second < 1.0);
    }
    #[test]
    fn rejects_invalid_rate() {
        assert!(matches!(
            TimestampAssigner::new(offset(), 0.0),
            Err(AcquisitionError::InvalidScanRate(_))
        ));
        assert!(TimestampAssigner::new(offset(), -5.0).is_err());
    }
}
