use crate::drivers::AcquisitionError;
use crate::types::{is_sentinel, EngineeringSample};
/// Per-channel `(raw - offset) / sensitivity` conversion.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UnitTransform {
    pub offset: f64,
    pub sensitivity: f64,
}
impl Default for UnitTransform {
    fn default() -> Self {
        Self {
            offset: 0.0,
            sensitivity: 1.0,
        }
    }
}
impl UnitTransform {
    pub fn new(offset: f64, sensitivity: f64) -> Self {
        Self {
            offset,
            sensitivity,
        }
    }
    /// The sentinel is recognised on the raw value, before any scaling.
    pub fn apply(&self, raw: f64) -> EngineeringSample {
        if is_sentinel(raw) {
            EngineeringSample::AcquisitionError
        } else {
            EngineeringSample::Value((raw - self.offset) / self.sensitivity)
        }
    }
}
/// Converts interleaved raw blocks using one transform per channel.
#[derive(Clone, Debug)]
pub struct BlockConverter {
    transforms: Vec<UnitTransform>,
}
impl BlockConverter {
    pub fn new(transforms: Vec<UnitTransform>) -> Result<Self, AcquisitionError> {
        if transforms.is_empty() {
            return Err(AcquisitionError::InvalidChannelCount);
        }
        if let Some(channel) = transforms
            .iter()
            .position(|t| t.sensitivity == 0.0 || !t.sensitivity.is_finite())
        {
            return Err(AcquisitionError::InvalidSensitivity { channel });
        }
        Ok(Self { transforms })
    }
    pub fn num_channels(&self) -> usize {
        self.transforms.len()
    }
    pub fn convert(&self, raw: &[f64]) -> Result<Vec<EngineeringSample>, AcquisitionError> {
        let channels = self.transforms.len();
        if raw.len() % channels != 0 {
            return Err(AcquisitionError::BlockShape {
                len: raw.len(),
                channels,
            });
        }
        Ok(raw
            .chunks_exact(channels)
            .flat_map(|scan| scan.iter().zip(&self.transforms).map(|(&v, t)| t.apply(v)))
            .collect())
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SENTINEL;
    #[test]
    fn scales_values_but_not_the_sentinel() {
        let t = UnitTransform::new(0.5, 2.0);
        assert_eq!(t.apply(4.5), EngineeringSample::Value(2.0));
        assert_eq!(t.apply(SENTINEL), EngineeringSample::AcquisitionError);
        // A scaled value landing on -9999 is still ordinary data.
        let odd = UnitTransform::new(0.0, 0.5);
        assert_eq!(odd.apply(-4999.5), EngineeringSample::Value(-9999.0));
    }
    #[test]
    fn converts_per_channel_in_interleaved_order() {
        let conv = BlockConverter::new(vec![
            UnitTransform::default(),
            UnitTransform::new(1.0, 10.0),
        ])
        .unwrap();
        let out = conv.convert(&[1.0, 11.0, 2.0, SENTINEL]).unwrap();
        assert_eq!(
            out,
            vec![
                EngineeringSample::Value(1.0),
                EngineeringSample::Value(1.0),
                EngineeringSample::Value(2.0),
                EngineeringSample::AcquisitionError,
            ]
        );
    }
    #[test]
    fn rejects_partial_scans_and_bad_sensitivity() {
        let conv = BlockConverter::new(vec![UnitTransform::default(); 3]).unwrap();
        assert!(matches!(
            conv.convert(&[0.0; 4]),
            Err(AcquisitionError::BlockShape { len: 4, channels: 3 })
        ));
        assert!(matches!(
            BlockConverter::new(vec![UnitTransform::default(), UnitTransform::new(0.0, 0.0)]),
            Err(AcquisitionError::InvalidSensitivity { channel: 1 })
        ));
        assert!(BlockConverter::new(Vec::new()).is_err());
    }
}
