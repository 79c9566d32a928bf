//! XDG Desktop Portal ScreenCast session.
//!
//! The portal is driven from a dedicated thread with its own current-thread
//! tokio runtime. Once the session is started the thread hands back the
//! PipeWire remote fd and node id, then stays alive to keep the session
//! open and watch for the compositor closing it.

use std::os::fd::OwnedFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use ashpd::desktop::screencast::{CursorMode, Screencast, SourceType, Stream as PortalStream};
use ashpd::desktop::PersistMode;
use ashpd::enumflags2::BitFlags;
use crossbeam_channel::{RecvTimeoutError, Sender};
use futures_util::StreamExt;
use tokio::sync::oneshot;

use crate::errors::PortalError;

/// Upper bound on waiting for the user to answer the share dialog.
pub const PORTAL_TIMEOUT: Duration = Duration::from_secs(60);

const POLL_INTERVAL: Duration = Duration::from_millis(100);

fn classify_portal_error<E: std::fmt::Display>(e: E) -> PortalError {
    let msg = e.to_string();
    if msg.contains("cancelled") || msg.contains("Cancelled") {
        PortalError::UserCancelled
    } else {
        PortalError::SessionFailed(msg)
    }
}

/// Whether the portal session is still alive. Cleared when the compositor
/// closes the session or the handle is dropped.
#[derive(Debug, Clone)]
pub struct SessionActivity(Arc<AtomicBool>);

impl SessionActivity {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn mark_closed(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Default for SessionActivity {
    fn default() -> Self {
        Self::new()
    }
}

struct PortalSessionData {
    pipewire_fd: OwnedFd,
    node_id: u32,
    size: Option<(i32, i32)>,
}

pub struct PortalHandle {
    close_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
    activity: SessionActivity,
}

impl PortalHandle {
    pub fn activity(&self) -> SessionActivity {
        self.activity.clone()
    }
}

impl std::fmt::Debug for PortalHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortalHandle")
            .field("active", &self.activity.is_active())
            .field("join_handle", &self.join_handle.is_some())
            .finish()
    }
}

impl Drop for PortalHandle {
    fn drop(&mut self) {
        if let Some(close_tx) = self.close_tx.take() {
            let _ = close_tx.send(());
        }
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }
        self.activity.mark_closed();
        tracing::debug!(target: "bridge", "[PORTAL] Session handle released");
    }
}

#[derive(Debug)]
pub struct ScreencastSession {
    pub pipewire_fd: OwnedFd,
    pub node_id: u32,
    pub size: Option<(i32, i32)>,
    pub handle: PortalHandle,
}

impl ScreencastSession {
    /// Opens a monitor screencast, waiting for the user's selection.
    ///
    /// Returns [`PortalError::Interrupted`] as soon as `shutdown` is set.
    pub fn open(shutdown: &AtomicBool) -> Result<Self, PortalError> {
        let (data_tx, data_rx) = crossbeam_channel::bounded::<Result<PortalSessionData, PortalError>>(1);
        let (close_tx, close_rx) = oneshot::channel::<()>();
        let activity = SessionActivity::new();
        let thread_activity = activity.clone();

        let join_handle = std::thread::Builder::new()
            .name("portal".to_string())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = data_tx.send(Err(PortalError::SessionFailed(format!(
                            "Failed to create tokio runtime: {}",
                            e
                        ))));
                        return;
                    }
                };

                rt.block_on(run_portal(data_tx, close_rx, thread_activity));
            })
            .map_err(|e| PortalError::SessionFailed(format!("Failed to spawn portal thread: {}", e)))?;

        let started = Instant::now();
        let data = loop {
            if shutdown.load(Ordering::SeqCst) {
                tracing::info!(target: "bridge", "[PORTAL] Shutdown requested while waiting for the portal");
                return Err(PortalError::Interrupted);
            }
            if started.elapsed() >= PORTAL_TIMEOUT {
                return Err(PortalError::Timeout(PORTAL_TIMEOUT));
            }
            match data_rx.recv_timeout(POLL_INTERVAL) {
                Ok(result) => break result?,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(PortalError::SessionFailed("Portal thread died".to_string()));
                }
            }
        };

        Ok(Self {
            pipewire_fd: data.pipewire_fd,
            node_id: data.node_id,
            size: data.size,
            handle: PortalHandle {
                close_tx: Some(close_tx),
                join_handle: Some(join_handle),
                activity,
            },
        })
    }
}

async fn run_portal(
    data_tx: Sender<Result<PortalSessionData, PortalError>>,
    close_rx: oneshot::Receiver<()>,
    activity: SessionActivity,
) {
    let proxy = match Screencast::new().await {
        Ok(proxy) => proxy,
        Err(e) => {
            tracing::error!(target: "bridge", "[PORTAL] Failed to create Screencast proxy: {}", e);
            let _ = data_tx.send(Err(PortalError::Unavailable));
            return;
        }
    };

    let session = match proxy.create_session().await {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(target: "bridge", "[PORTAL] Failed to create session: {}", e);
            let _ = data_tx.send(Err(PortalError::SessionFailed(format!(
                "Failed to create session: {}",
                e
            ))));
            return;
        }
    };
    tracing::debug!(target: "bridge", "[PORTAL] Session created");

    let data = match start_session(&proxy, &session).await {
        Ok(data) => data,
        Err(e) => {
            let _ = data_tx.send(Err(e));
            return;
        }
    };

    let closed = match session.receive_closed().await {
        Ok(stream) => Some(stream),
        Err(e) => {
            tracing::warn!(target: "bridge", "[PORTAL] Cannot watch session close signal: {}", e);
            None
        }
    };

    if data_tx.send(Ok(data)).is_err() {
        tracing::warn!(target: "bridge", "[PORTAL] Receiver dropped before data sent");
        return;
    }

    match closed {
        Some(closed) => {
            futures_util::pin_mut!(closed);
            tokio::select! {
                _ = close_rx => {
                    tracing::debug!(target: "bridge", "[PORTAL] Close signal received, dropping session");
                }
                _ = closed.next() => {
                    tracing::info!(target: "bridge", "[PORTAL] Session closed by the compositor");
                    activity.mark_closed();
                }
            }
        }
        None => {
            let _ = close_rx.await;
        }
    }

    if let Err(e) = session.close().await {
        tracing::debug!(target: "bridge", "[PORTAL] Session close: {}", e);
    }
    activity.mark_closed();
}

async fn start_session(
    proxy: &Screencast<'_>,
    session: &ashpd::desktop::Session<'_, Screencast<'_>>,
) -> Result<PortalSessionData, PortalError> {
    proxy
        .select_sources(
            session,
            CursorMode::Embedded,
            BitFlags::from_flag(SourceType::Monitor),
            false,
            None,
            PersistMode::DoNot,
        )
        .await
        .map_err(|e| {
            tracing::warn!(target: "bridge", "[PORTAL] Source selection failed: {}", e);
            classify_portal_error(e)
        })?;
    tracing::debug!(target: "bridge", "[PORTAL] Sources selected");

    let response = proxy
        .start(session, None)
        .await
        .map_err(|e| {
            tracing::warn!(target: "bridge", "[PORTAL] Failed to start session: {}", e);
            classify_portal_error(e)
        })?
        .response()
        .map_err(|e| {
            tracing::warn!(target: "bridge", "[PORTAL] Session response error: {}", e);
            classify_portal_error(e)
        })?;

    let streams: Vec<&PortalStream> = response.streams().iter().collect();
    let Some(stream) = streams.first() else {
        tracing::error!(target: "bridge", "[PORTAL] No streams returned");
        return Err(PortalError::NoStreams);
    };
    if streams.len() > 1 {
        tracing::debug!(target: "bridge", "[PORTAL] {} streams returned, using the first", streams.len());
    }

    let node_id = stream.pipe_wire_node_id();
    let size = stream.size();
    tracing::info!(
        target: "bridge",
        "[PORTAL] Stream acquired: node_id={}, size={:?}",
        node_id,
        size
    );

    let pipewire_fd = proxy.open_pipe_wire_remote(session).await.map_err(|e| {
        tracing::error!(target: "bridge", "[PORTAL] Failed to open PipeWire remote: {}", e);
        PortalError::SessionFailed(format!("Failed to open PipeWire remote: {}", e))
    })?;

    tracing::debug!(target: "bridge", "[PORTAL] PipeWire remote fd acquired");

    Ok(PortalSessionData {
        pipewire_fd,
        node_id,
        size,
    })
}
