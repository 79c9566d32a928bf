//! Screen capture input: the portal session and the PipeWire stream it opens.

pub mod portal;
pub mod stream;

pub use portal::{PortalHandle, ScreencastSession, SessionActivity, PORTAL_TIMEOUT};
pub use stream::run_stream_loop;
