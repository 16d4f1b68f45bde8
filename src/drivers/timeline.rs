use parking_lot::{RwLock, RwLockReadGuard};
use crate::drivers::AcquisitionError;
use crate::types::ScanIndex;
/// Anything that can answer "when was scan N taken".
pub trait TimeLookup {
    fn timestamp(&self, scan: ScanIndex) -> Result<f64, AcquisitionError>;
}
/// Append-only scan timeline shared between the ingestion writer and the
/// detection readers. Every mutation and lookup goes through the lock.
#[derive(Debug, Default)]
pub struct Timeline {
    stamps: RwLock<Vec<f64>>,
}
impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }
    /// Appends timestamps for the next scans. Nothing is written unless the whole
    /// batch keeps the timeline strictly increasing.
    pub fn extend(&self, new_stamps: &[f64]) -> Result<(), AcquisitionError> {
        let mut stamps = self.stamps.write();
        let mut previous = stamps.last().copied();
        for &next in new_stamps {
            if let Some(prev) = previous {
                if !(next > prev) {
                    return Err(AcquisitionError::NonMonotonicTimeline {
                        previous: prev,
                        next,
                    });
                }
            }
            previous = Some(next);
        }
        stamps.extend_from_slice(new_stamps);
        Ok(())
    }
    pub fn get(&self, scan: ScanIndex) -> Result<f64, AcquisitionError> {
        lookup(&self.stamps.read(), scan)
    }
    pub fn len(&self) -> u64 {
        self.stamps.read().len() as u64
    }
    pub fn is_empty(&self) -> bool {
        self.stamps.read().is_empty()
    }
    /// Holds the read lock for a batch of lookups, e.g. a whole block.
    pub fn view(&self) -> TimelineView<'_> {
        TimelineView {
            stamps: self.stamps.read(),
        }
    }
}
impl TimeLookup for Timeline {
    fn timestamp(&self, scan: ScanIndex) -> Result<f64, AcquisitionError> {
        self.get(scan)
    }
}
pub struct TimelineView<'a> {
    stamps: RwLockReadGuard<'a, Vec<f64>>,
}
impl TimelineView<'_> {
    pub fn len(&self) -> u64 {
        self.stamps.len() as u64
    }
    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }
}
impl TimeLookup for TimelineView<'_> {
    fn timestamp(&self, scan: ScanIndex) -> Result<f64, AcquisitionError> {
        lookup(&self.stamps, scan)
    }
}
fn lookup(stamps: &[f64], scan: ScanIndex) -> Result<f64, AcquisitionError> {
    usize::try_from(scan)
        .ok()
        .and_then(|idx| stamps.get(idx).copied())
        .ok_or(AcquisitionError::TimestampOutOfRange {
            requested: scan,
            len: stamps.len() as u64,
        })
}
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    #[test]
    fn extend_appends_and_get_reads_back() {
        let timeline = Timeline::new();
        assert!(timeline.is_empty());
        timeline.extend(&[1.0, 1.001, 1.002]).unwrap();
        timeline.extend(&[1.003]).unwrap();
        assert_eq!(timeline.len(), 4);
        assert_eq!(timeline.get(0).unwrap(), 1.0);
        assert_eq!(timeline.get(3).unwrap(), 1.003);
    }
    #[test]
    fn lookup_past_end_is_an_error() {
        let timeline = Timeline::new();
        timeline.extend(&[5.0, 6.0]).unwrap();
        match timeline.get(2) {
            Err(AcquisitionError::TimestampOutOfRange { requested, len }) => {
                assert_eq!(requested, 2);
                assert_eq!(len, 2);
            }
            other => panic!("expected out-of-range error, got {other:?}"),
        }
        assert!(timeline.view().timestamp(7).is_err());
    }
    #[test]
    fn extend_rejects_non_increasing_batches_atomically() {
        let timeline = Timeline::new();
        timeline.extend(&[1.0, 2.0]).unwrap();
        assert!(timeline.extend(&[3.0, 3.0]).is_err());
        assert!(timeline.extend(&[1.5]).is_err());
        assert_eq!(timeline.len(), 2);
    }
    #[test]
    fn readers_see_only_written_scans() {
        let timeline = Arc::new(Timeline::new());
        let writer = {
            let timeline = Arc::clone(&timeline);
            thread::spawn(move || {
                for block in 0..100u32 {
                    let base = f64::from(block) * 10.0;
                    let stamps: Vec<f64> = (0..10).map(|i| base + f64::from(i)).collect();
                    timeline.extend(&stamps).unwrap();
                }
            })
        };
        for _ in 0..1000 {
            let view = timeline.view();
            let len = view.len();
            if !view.is_empty() {
                assert_eq!(view.timestamp(len - 1).unwrap(), (len - 1) as f64);
            }
            assert!(view.timestamp(len).is_err());
        }
        writer.join().unwrap();
        assert_eq!(timeline.len(), 1000);
    }
}
