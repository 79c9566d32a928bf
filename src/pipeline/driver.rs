//! Couples the state machine with the frame processor.
//!
//! Events go through [`transition`]; `ConfigureSink` is executed here
//! against the processor, everything else is handed back to the caller
//! (portal, PipeWire loop, resource release).

use super::acquire::InboundBuffer;
use super::processor::{FormatOutcome, FrameOutcome, FrameProcessor, SkipReason};
use super::sink::FrameSink;
use super::state::{transition, PipelineEvent, PipelineState, SideEffect};

pub struct PipelineDriver<S: FrameSink> {
    state: PipelineState,
    processor: FrameProcessor<S>,
}

impl<S: FrameSink> PipelineDriver<S> {
    pub fn new(processor: FrameProcessor<S>) -> Self {
        Self {
            state: PipelineState::Idle,
            processor,
        }
    }

    /// Applies `event` and returns the side effects the caller must run.
    pub fn handle(&mut self, event: PipelineEvent) -> Vec<SideEffect> {
        let mut pending = vec![event];
        let mut external = Vec::new();

        while let Some(event) = pending.pop() {
            let previous = self.state.name();
            let (next, effects) = transition(std::mem::take(&mut self.state), event);
            if next.name() != previous {
                tracing::debug!(target: "bridge", "[STATE] {} -> {}", previous, next.name());
            }
            self.state = next;

            for effect in effects {
                match effect {
                    SideEffect::ConfigureSink { format } => {
                        if self.processor.on_format_changed(format) == FormatOutcome::Rejected {
                            pending.push(PipelineEvent::FormatRejected);
                        }
                    }
                    other => external.push(other),
                }
            }
        }

        external
    }

    /// Runs one delivered buffer through the processor while streaming.
    pub fn on_buffer(
        &mut self,
        buffer: InboundBuffer<'_>,
        session_active: bool,
    ) -> (FrameOutcome, Vec<SideEffect>) {
        if !matches!(self.state, PipelineState::Streaming { .. }) {
            return (FrameOutcome::Skipped(SkipReason::NoFormat), Vec::new());
        }

        let outcome = self.processor.on_buffer(buffer, session_active);
        let effects = if outcome == FrameOutcome::ShutdownRequested {
            self.handle(PipelineEvent::SinkShutdownRequested)
        } else {
            Vec::new()
        };
        (outcome, effects)
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn processor(&self) -> &FrameProcessor<S> {
        &self.processor
    }

    pub fn into_processor(self) -> FrameProcessor<S> {
        self.processor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SinkError;
    use crate::pipeline::format::{Geometry, SourceFormat, SourceLayout};
    use crate::pipeline::sink::SinkWriter;

    struct RefusingSink;

    impl FrameSink for RefusingSink {
        fn set_format(&mut self, _geometry: Geometry) -> Result<(), SinkError> {
            Err(SinkError::Format("EBUSY".to_string()))
        }

        fn write_frame(&mut self, frame: &[u8]) -> Result<usize, SinkError> {
            Ok(frame.len())
        }
    }

    #[test]
    fn test_startup_sequence_effects() {
        let processor = FrameProcessor::new(SinkWriter::new(RefusingSink), None);
        let mut driver = PipelineDriver::new(processor);

        assert_eq!(driver.handle(PipelineEvent::StartRequested), vec![SideEffect::OpenSession]);
        assert_eq!(
            driver.handle(PipelineEvent::TransportReady { node_id: 5 }),
            vec![SideEffect::ConnectStream { node_id: 5 }]
        );
    }

    #[test]
    fn test_refused_sink_format_keeps_negotiating() {
        let processor = FrameProcessor::new(SinkWriter::new(RefusingSink), None);
        let mut driver = PipelineDriver::new(processor);
        driver.handle(PipelineEvent::StartRequested);
        driver.handle(PipelineEvent::TransportReady { node_id: 5 });

        let effects = driver.handle(PipelineEvent::FormatChanged {
            format: SourceFormat::new(640, 480, SourceLayout::Bgrx),
        });

        assert!(effects.is_empty());
        assert_eq!(driver.state(), &PipelineState::Negotiating { node_id: 5 });
    }

    #[test]
    fn test_termination_quits_loop() {
        let processor = FrameProcessor::new(SinkWriter::new(RefusingSink), None);
        let mut driver = PipelineDriver::new(processor);
        driver.handle(PipelineEvent::StartRequested);

        let effects = driver.handle(PipelineEvent::TerminationRequested);
        assert_eq!(effects, vec![SideEffect::QuitLoop, SideEffect::ReleaseResources]);
        assert!(driver.handle(PipelineEvent::TerminationRequested).is_empty());
    }
}
