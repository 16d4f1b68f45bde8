// 采集核心：时钟同步、时间戳、时间线、事件检测、数据流水线
pub mod clock;
pub mod detector;
pub mod error;
pub mod pipeline;
pub mod source;
pub mod timeline;
pub mod timestamp;
pub mod units;
// 公开导出这些模块里的结构体，方便外部调用
pub use clock::{elapsed_ticks, ClockOffset, ClockSynchronizer};
pub use detector::{ChannelState, EventDetector};
pub use error::AcquisitionError;
pub use pipeline::{BlockOutcome, DetectionMode, IngestionPipeline, PipelineSettings};
pub use source::{ManualSource, SimulatedSource, SimulationSettings, StreamSource};
pub use timeline::{TimeLookup, Timeline, TimelineView};
pub use timestamp::{timestamp_for, TimestampAssigner};
pub use units::{BlockConverter, UnitTransform};
