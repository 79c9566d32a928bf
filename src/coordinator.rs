//! Wires the sink, portal, PipeWire stream and state machine together and
//! executes the side effects the driver hands back.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::os::fd::OwnedFd;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::capture::{run_stream_loop, PortalHandle, ScreencastSession};
use crate::core::config::{Mode, RunConfig};
use crate::errors::{BridgeError, PortalError};
use crate::gpu::probe_importer;
use crate::pipeline::{
    FrameProcessor, PipelineDriver, PipelineEvent, PipelineState, SideEffect, SinkWriter, V4l2Sink,
};
use crate::testpattern::run_color_bars;

/// Runs the configured mode until shutdown. Sink open failure is fatal.
pub fn run(config: &RunConfig, shutdown: Arc<AtomicBool>) -> Result<(), BridgeError> {
    tracing::info!(target: "system", "Starting GNOME to V4L2 loopback");
    tracing::info!(target: "system", "V4L2 device: {}", config.device.display());

    let sink = V4l2Sink::open(&config.device)?;

    match config.mode {
        Mode::ColorBars { geometry, fps } => {
            tracing::info!(target: "system", "Mode: colour bars test pattern {} at {} fps", geometry, fps);
            let mut writer = SinkWriter::new(sink);
            run_color_bars(&mut writer, geometry, fps, &shutdown);
            log_shutdown_cause(&shutdown);
            Ok(())
        }
        Mode::Bridge => {
            tracing::info!(
                target: "system",
                "Mode: screen capture (resolution will be determined by PipeWire)"
            );
            run_bridge(sink, shutdown)
        }
    }
}

fn log_shutdown_cause(shutdown: &AtomicBool) {
    if shutdown.load(Ordering::SeqCst) {
        tracing::info!(target: "system", "Termination signal received, shutting down gracefully");
    }
}

/// Portal resources held between `OpenSession` and `ReleaseResources`.
#[derive(Default)]
struct SessionResources {
    pipewire_fd: Option<OwnedFd>,
    handle: Option<PortalHandle>,
}

impl SessionResources {
    fn release(&mut self) {
        self.pipewire_fd = None;
        if self.handle.take().is_some() {
            tracing::debug!(target: "bridge", "[PORTAL] Session released");
        }
    }
}

fn run_bridge(sink: V4l2Sink, shutdown: Arc<AtomicBool>) -> Result<(), BridgeError> {
    let importer = probe_importer();
    tracing::info!(
        target: "system",
        "GPU DMA-BUF import: {}",
        if importer.is_some() { "available" } else { "unavailable, mmap only" }
    );

    let processor = FrameProcessor::new(SinkWriter::new(sink), importer);
    let driver = Rc::new(RefCell::new(PipelineDriver::new(processor)));

    let mut resources = SessionResources::default();
    let mut failure: Option<BridgeError> = None;
    let mut pending: VecDeque<SideEffect> =
        driver.borrow_mut().handle(PipelineEvent::StartRequested).into();

    while let Some(effect) = pending.pop_front() {
        match effect {
            SideEffect::OpenSession => {
                tracing::info!(
                    target: "bridge",
                    "[PORTAL] A dialog will ask which monitor to share"
                );
                let event = match ScreencastSession::open(&shutdown) {
                    Ok(session) => {
                        let node_id = session.node_id;
                        resources.pipewire_fd = Some(session.pipewire_fd);
                        resources.handle = Some(session.handle);
                        PipelineEvent::TransportReady { node_id }
                    }
                    Err(PortalError::Interrupted) => PipelineEvent::TerminationRequested,
                    Err(e) => {
                        tracing::error!(target: "bridge", "[PORTAL] {}", e);
                        let error = e.to_string();
                        failure = Some(e.into());
                        PipelineEvent::Fatal { error }
                    }
                };
                pending.extend(driver.borrow_mut().handle(event));
            }

            SideEffect::ConnectStream { node_id } => {
                let (Some(fd), Some(handle)) =
                    (resources.pipewire_fd.take(), resources.handle.as_ref())
                else {
                    let error = "stream requested without a portal session".to_string();
                    pending.extend(driver.borrow_mut().handle(PipelineEvent::Fatal { error }));
                    continue;
                };
                let activity = handle.activity();

                match run_stream_loop(fd, node_id, Rc::clone(&driver), Arc::clone(&shutdown), activity) {
                    Ok(deferred) => pending.extend(deferred),
                    Err(e) => {
                        let error = e.to_string();
                        failure = Some(e.into());
                        pending.extend(driver.borrow_mut().handle(PipelineEvent::Fatal { error }));
                    }
                }

                // The loop can also end on its own, e.g. when the daemon goes away.
                if !driver.borrow().state().is_shutting_down() {
                    tracing::warn!(target: "bridge", "[PIPEWIRE] Main loop ended unexpectedly");
                    pending.extend(driver.borrow_mut().handle(PipelineEvent::TerminationRequested));
                }
            }

            SideEffect::ReleaseResources => {
                resources.release();
                pending.extend(driver.borrow_mut().handle(PipelineEvent::ResourcesReleased));
            }

            // The loop quits itself and the driver applies sink configuration.
            SideEffect::QuitLoop | SideEffect::ConfigureSink { .. } => {}
        }
    }
    resources.release();

    let driver = driver.borrow();
    let stats = driver.processor().stats();
    tracing::info!(
        target: "bridge",
        "[STATE] Final state {}: received={} written={} skipped={} write_failures={}",
        driver.state().name(),
        stats.received,
        stats.written,
        stats.skipped,
        stats.write_failures
    );
    log_shutdown_cause(&shutdown);

    if let Some(e) = failure {
        return Err(e);
    }
    match driver.state() {
        PipelineState::Failed { error } => Err(BridgeError::Pipeline(error.clone())),
        _ => Ok(()),
    }
}
