//! Correlation between the device's 32-bit tick counter and wall-clock time.
//!
//! The counter wraps to zero after `MAX_UINT32`, so every elapsed-time
//! computation goes through [`elapsed_ticks`]. Wall time around a counter read
//! is sampled before and after, and the midpoint is taken as the instant the
//! tick value belongs to; the error is then bounded by half the round trip.
use std::time::{SystemTime, UNIX_EPOCH};
use crate::drivers::AcquisitionError;
/// Largest value the hardware counter reaches before wrapping to zero.
pub const MAX_UINT32: u32 = u32::MAX;
/// Ticks between two counter readings, allowing for at most one wrap.
pub fn elapsed_ticks(start: u32, end: u32) -> u64 {
    if end >= start {
        u64::from(end - start)
    } else {
        // remaining ticks up to the wrap, the wrap itself, then up to `end`
        u64::from(MAX_UINT32 - start) + 1 + u64::from(end)
    }
}
pub fn elapsed_seconds(start: u32, end: u32, ticks_per_second: f64) -> f64 {
    elapsed_ticks(start, end) as f64 / ticks_per_second
}
/// Wall-clock seconds since the Unix epoch.
pub fn system_now() -> Result<f64, AcquisitionError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .map_err(|e| AcquisitionError::ClockSync(format!("system clock before epoch: {e}")))
}
/// Mapping from hardware ticks to wall time, fixed for a whole stream session.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClockOffset {
    pub hardware_origin_ticks: u32,
    pub wall_origin_seconds: f64,
    pub ticks_per_second: f64,
}
impl ClockOffset {
    pub fn wall_time_at(&self, ticks: u32) -> f64 {
        self.wall_origin_seconds
            + elapsed_seconds(self.hardware_origin_ticks, ticks, self.ticks_per_second)
    }
}
pub struct ClockSynchronizer {
    ticks_per_second: f64,
}
impl ClockSynchronizer {
    pub fn new(ticks_per_second: f64) -> Result<Self, AcquisitionError> {
        if !(ticks_per_second > 0.0) || !ticks_per_second.is_finite() {
            return Err(AcquisitionError::ClockSync(format!(
                "tick frequency must be positive, got {ticks_per_second}"
            )));
        }
        Ok(Self { ticks_per_second })
    }
    pub fn ticks_per_second(&self) -> f64 {
        self.ticks_per_second
    }
    /// Reads the counter once, bracketed by two wall-clock readings.
    /// Returns the tick value and the midpoint wall time.
    pub fn paired_read<R, N>(read_tick: &mut R, now: &mut N) -> Result<(u32, f64), AcquisitionError>
    where
        R: FnMut() -> Result<u32, AcquisitionError>,
        N: FnMut() -> Result<f64, AcquisitionError>,
    {
        let before = now()?;
        let ticks = read_tick()?;
        let after = now()?;
        Ok((ticks, before + (after - before) / 2.0))
    }
    /// Builds the session offset from the counter value latched when the stream
    /// started plus one paired read of the live counter.
    pub fn synchronize<R, N>(
        &self,
        stream_start_ticks: u32,
        mut read_tick: R,
        mut now: N,
    ) -> Result<ClockOffset, AcquisitionError>
    where
        R: FnMut() -> Result<u32, AcquisitionError>,
        N: FnMut() -> Result<f64, AcquisitionError>,
    {
        let (ticks, wall) = Self::paired_read(&mut read_tick, &mut now)?;
        let since_start = elapsed_seconds(stream_start_ticks, ticks, self.ticks_per_second);
        Ok(ClockOffset {
            hardware_origin_ticks: stream_start_ticks,
            wall_origin_seconds: wall - since_start,
            ticks_per_second: self.ticks_per_second,
        })
    }
    /// Averages `wall - ticks / ticks_per_second` over `samples` paired reads.
    pub fn calibrate<R, N>(
        &self,
        samples: usize,
        mut read_tick: R,
        mut now: N,
    ) -> Result<f64, AcquisitionError>
    where
        R: FnMut() -> Result<u32, AcquisitionError>,
        N: FnMut() -> Result<f64, AcquisitionError>,
    {
        if samples == 0 {
            return Err(AcquisitionError::ClockSync(
                "calibration needs at least one paired read".into(),
            ));
        }
        let mut sum = 0.0;
        for _ in 0..samples {
            let (ticks, wall) = Self::paired_read(&mut read_tick, &mut now)?;
            sum += wall - f64::from(ticks) / self.ticks_per_second;
        }
        Ok(sum / samples as f64)
    }
}
