//! Frame pipeline: format registry, buffer acquisition, conversion,
//! warm-up filtering, sink output and the lifecycle state machine.

pub mod acquire;
pub mod convert;
pub mod diagnostics;
pub mod driver;
pub mod format;
pub mod processor;
pub mod sink;
pub mod state;
pub mod validity;

pub use driver::PipelineDriver;
pub use format::{Geometry, SourceFormat, SourceLayout};
pub use processor::{FormatOutcome, FrameOutcome, FrameProcessor, SkipReason};
pub use sink::{FrameSink, SinkWriter, V4l2Sink, WriteOutcome};
pub use state::{PipelineEvent, PipelineState, SideEffect};
