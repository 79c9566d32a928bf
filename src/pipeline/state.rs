//! Pure state machine for the bridge lifecycle.
//!
//! This module implements the state machine as a pure function:
//! `(State, Event) -> (NewState, Vec<SideEffect>)`
//!
//! Invalid transitions return the current state with empty effects.
//! The coordinator executes the side effects; nothing here performs I/O.

use super::format::SourceFormat;

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineState {
    /// Nothing started yet.
    Idle,

    /// Portal session requested, waiting for the PipeWire remote.
    AwaitingTransport,

    /// Stream connected, waiting for a usable format.
    Negotiating { node_id: u32 },

    /// Frames are flowing with `format`.
    Streaming { node_id: u32, format: SourceFormat },

    /// Shutdown requested, resources not yet released.
    Closing,

    Closed,

    Failed { error: String },
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::Idle
    }
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Closed | PipelineState::Failed { .. })
    }

    /// True once a close was requested or the pipeline ended.
    pub fn is_shutting_down(&self) -> bool {
        matches!(self, PipelineState::Closing) || self.is_terminal()
    }

    pub fn format(&self) -> Option<&SourceFormat> {
        match self {
            PipelineState::Streaming { format, .. } => Some(format),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::AwaitingTransport => "awaiting-transport",
            PipelineState::Negotiating { .. } => "negotiating",
            PipelineState::Streaming { .. } => "streaming",
            PipelineState::Closing => "closing",
            PipelineState::Closed => "closed",
            PipelineState::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    StartRequested,

    /// The portal handed over a PipeWire remote and a node to consume.
    TransportReady { node_id: u32 },

    /// The transport negotiated a supported format.
    FormatChanged { format: SourceFormat },

    /// The sink could not be configured for the last format.
    FormatRejected,

    SessionClosed,

    /// The sink writer gave up after repeated failures.
    SinkShutdownRequested,

    /// SIGINT or SIGTERM.
    TerminationRequested,

    ResourcesReleased,

    Fatal { error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    OpenSession,

    ConnectStream { node_id: u32 },

    /// Reconfigure sink and scratch buffers for `format`.
    ConfigureSink { format: SourceFormat },

    QuitLoop,

    ReleaseResources,
}

/// Pure state transition function.
///
/// Returns the new state and any side effects to execute.
/// Invalid transitions return the current state with an empty effect list.
pub fn transition(state: PipelineState, event: PipelineEvent) -> (PipelineState, Vec<SideEffect>) {
    match (&state, event) {
        (PipelineState::Idle, PipelineEvent::StartRequested) => {
            (PipelineState::AwaitingTransport, vec![SideEffect::OpenSession])
        }

        (PipelineState::AwaitingTransport, PipelineEvent::TransportReady { node_id }) => (
            PipelineState::Negotiating { node_id },
            vec![SideEffect::ConnectStream { node_id }],
        ),

        (PipelineState::Negotiating { node_id }, PipelineEvent::FormatChanged { format }) => (
            PipelineState::Streaming {
                node_id: *node_id,
                format,
            },
            vec![SideEffect::ConfigureSink { format }],
        ),

        // Renegotiation while streaming stays in Streaming
        (PipelineState::Streaming { node_id, .. }, PipelineEvent::FormatChanged { format }) => (
            PipelineState::Streaming {
                node_id: *node_id,
                format,
            },
            vec![SideEffect::ConfigureSink { format }],
        ),

        (PipelineState::Streaming { node_id, .. }, PipelineEvent::FormatRejected) => {
            (PipelineState::Negotiating { node_id: *node_id }, vec![])
        }

        (
            PipelineState::Idle
            | PipelineState::AwaitingTransport
            | PipelineState::Negotiating { .. }
            | PipelineState::Streaming { .. },
            PipelineEvent::SessionClosed
            | PipelineEvent::SinkShutdownRequested
            | PipelineEvent::TerminationRequested,
        ) => (
            PipelineState::Closing,
            vec![SideEffect::QuitLoop, SideEffect::ReleaseResources],
        ),

        (PipelineState::Closing, PipelineEvent::ResourcesReleased) => (PipelineState::Closed, vec![]),

        (PipelineState::Closing, PipelineEvent::Fatal { error }) => {
            (PipelineState::Failed { error }, vec![])
        }

        (
            PipelineState::Idle
            | PipelineState::AwaitingTransport
            | PipelineState::Negotiating { .. }
            | PipelineState::Streaming { .. },
            PipelineEvent::Fatal { error },
        ) => (
            PipelineState::Failed { error },
            vec![SideEffect::QuitLoop, SideEffect::ReleaseResources],
        ),

        // Invalid transition: return current state with no effects
        _ => (state, vec![]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::format::SourceLayout;

    fn streaming() -> PipelineState {
        PipelineState::Streaming {
            node_id: 42,
            format: SourceFormat::new(1280, 720, SourceLayout::Bgrx),
        }
    }

    #[test]
    fn test_idle_to_awaiting_transport() {
        let (new_state, effects) = transition(PipelineState::Idle, PipelineEvent::StartRequested);

        assert_eq!(new_state, PipelineState::AwaitingTransport);
        assert_eq!(effects, vec![SideEffect::OpenSession]);
    }

    #[test]
    fn test_transport_ready_connects_stream() {
        let (new_state, effects) = transition(
            PipelineState::AwaitingTransport,
            PipelineEvent::TransportReady { node_id: 42 },
        );

        assert_eq!(new_state, PipelineState::Negotiating { node_id: 42 });
        assert_eq!(effects, vec![SideEffect::ConnectStream { node_id: 42 }]);
    }

    #[test]
    fn test_first_format_starts_streaming() {
        let format = SourceFormat::new(1920, 1080, SourceLayout::Rgbx);
        let (new_state, effects) = transition(
            PipelineState::Negotiating { node_id: 7 },
            PipelineEvent::FormatChanged { format },
        );

        assert_eq!(new_state.format(), Some(&format));
        assert_eq!(effects, vec![SideEffect::ConfigureSink { format }]);
    }

    #[test]
    fn test_renegotiation_stays_streaming() {
        let format = SourceFormat::new(800, 600, SourceLayout::Bgrx);
        let (new_state, effects) =
            transition(streaming(), PipelineEvent::FormatChanged { format });

        assert!(matches!(new_state, PipelineState::Streaming { node_id: 42, .. }));
        assert_eq!(effects, vec![SideEffect::ConfigureSink { format }]);
    }

    #[test]
    fn test_rejected_format_returns_to_negotiating() {
        let (new_state, effects) = transition(streaming(), PipelineEvent::FormatRejected);

        assert_eq!(new_state, PipelineState::Negotiating { node_id: 42 });
        assert!(effects.is_empty());
    }

    #[test]
    fn test_every_shutdown_trigger_closes() {
        for event in [
            PipelineEvent::SessionClosed,
            PipelineEvent::SinkShutdownRequested,
            PipelineEvent::TerminationRequested,
        ] {
            let (new_state, effects) = transition(streaming(), event);
            assert_eq!(new_state, PipelineState::Closing);
            assert!(effects.contains(&SideEffect::QuitLoop));
            assert!(effects.contains(&SideEffect::ReleaseResources));
        }
    }

    #[test]
    fn test_close_from_partial_init() {
        let (new_state, effects) =
            transition(PipelineState::AwaitingTransport, PipelineEvent::TerminationRequested);

        assert_eq!(new_state, PipelineState::Closing);
        assert!(effects.contains(&SideEffect::ReleaseResources));
    }

    #[test]
    fn test_repeated_close_is_noop() {
        let (new_state, effects) = transition(PipelineState::Closing, PipelineEvent::SessionClosed);

        assert_eq!(new_state, PipelineState::Closing);
        assert!(effects.is_empty());
    }

    #[test]
    fn test_closing_to_closed() {
        let (new_state, effects) =
            transition(PipelineState::Closing, PipelineEvent::ResourcesReleased);

        assert_eq!(new_state, PipelineState::Closed);
        assert!(effects.is_empty());
        assert!(new_state.is_terminal());
    }

    #[test]
    fn test_fatal_from_any_live_state() {
        for state in [
            PipelineState::Idle,
            PipelineState::AwaitingTransport,
            PipelineState::Negotiating { node_id: 1 },
            streaming(),
        ] {
            let (new_state, effects) = transition(
                state,
                PipelineEvent::Fatal {
                    error: "boom".to_string(),
                },
            );
            assert!(matches!(new_state, PipelineState::Failed { .. }));
            assert!(effects.contains(&SideEffect::ReleaseResources));
        }
    }

    #[test]
    fn test_closed_is_terminal() {
        let (new_state, effects) = transition(PipelineState::Closed, PipelineEvent::StartRequested);

        assert_eq!(new_state, PipelineState::Closed);
        assert!(effects.is_empty());
    }

    #[test]
    fn test_format_before_transport_is_ignored() {
        let format = SourceFormat::new(640, 480, SourceLayout::Bgrx);
        let (new_state, effects) =
            transition(PipelineState::AwaitingTransport, PipelineEvent::FormatChanged { format });

        assert_eq!(new_state, PipelineState::AwaitingTransport);
        assert!(effects.is_empty());
    }
}
