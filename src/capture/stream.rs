//! PipeWire consumer for the portal's screencast node.
//!
//! Every callback runs on the main-loop thread, so the driver lives in an
//! `Rc<RefCell<_>>` shared between them and never crosses a thread.

use std::cell::{Cell, RefCell};
use std::os::fd::OwnedFd;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pipewire as pw;
use pw::spa::buffer::Data;
use pw::spa::param::format::{FormatProperties, MediaSubtype, MediaType};
use pw::spa::param::format_utils;
use pw::spa::param::video::{VideoFormat, VideoInfoRaw};
use pw::spa::param::ParamType;
use pw::spa::pod::serialize::PodSerializer;
use pw::spa::pod::Pod;
use pw::spa::utils::SpaTypes;
use pw::stream::{StreamFlags, StreamState};
use libspa::sys as spa_sys;

use super::portal::SessionActivity;
use crate::errors::StreamError;
use crate::pipeline::acquire::{BufferMemory, ChunkInfo, InboundBuffer, MapSource};
use crate::pipeline::format::{SourceFormat, SourceLayout};
use crate::pipeline::{FrameSink, PipelineDriver, PipelineEvent, SideEffect};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const PROGRESS_EVERY: u64 = 300;

/// `SPA_DATA_FLAG_MAPPABLE` from spa/buffer/buffer.h.
const DATA_FLAG_MAPPABLE: u32 = 1 << 3;

const NO_FORMATS_HINT: &str = "no more input formats";

/// Quits the main loop when dropped, so every early return leaves it stopped.
pub struct LoopGuard {
    mainloop: pw::main_loop::MainLoop,
    completed: bool,
}

impl LoopGuard {
    pub fn new(mainloop: pw::main_loop::MainLoop) -> Self {
        Self {
            mainloop,
            completed: false,
        }
    }

    pub fn mainloop(&self) -> &pw::main_loop::MainLoop {
        &self.mainloop
    }

    pub fn mark_completed(&mut self) {
        self.completed = true;
    }

    pub fn run(&self) {
        self.mainloop.run();
    }
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        self.mainloop.quit();

        if !self.completed {
            tracing::warn!(
                target: "bridge",
                "[PIPEWIRE] Main loop dropped without completion - abnormal termination"
            );
        }
    }
}

/// Runs driver side effects that belong to the loop and defers the rest
/// to the caller.
#[derive(Clone)]
struct EffectRouter {
    mainloop: pw::main_loop::MainLoop,
    deferred: Rc<RefCell<Vec<SideEffect>>>,
}

impl EffectRouter {
    fn apply(&self, effects: Vec<SideEffect>) {
        for effect in effects {
            match effect {
                SideEffect::QuitLoop => self.mainloop.quit(),
                other => self.deferred.borrow_mut().push(other),
            }
        }
    }
}

/// Parses a negotiated `Format` param into a [`SourceFormat`].
fn parse_format(param: &Pod) -> Result<SourceFormat, StreamError> {
    let (media_type, media_subtype) = format_utils::parse_format(param)
        .map_err(|e| StreamError::FormatParse(format!("{:?}", e)))?;

    if media_type != MediaType::Video || media_subtype != MediaSubtype::Raw {
        return Err(StreamError::UnsupportedFormat(format!(
            "{:?}/{:?}",
            media_type, media_subtype
        )));
    }

    let mut info = VideoInfoRaw::new();
    info.parse(param)
        .map_err(|e| StreamError::FormatParse(format!("{:?}", e)))?;

    let layout = SourceLayout::from_video_format(info.format())
        .ok_or_else(|| StreamError::UnsupportedFormat(format!("{:?}", info.format())))?;
    let size = info.size();

    Ok(SourceFormat::new(size.width, size.height, layout))
}

/// Classifies plane 0 of a dequeued buffer without taking ownership of it.
fn inbound_buffer(data: &mut Data) -> InboundBuffer<'_> {
    let raw = data.as_raw();
    let kind = raw.type_;
    let mappable = raw.flags & DATA_FLAG_MAPPABLE != 0;
    let map = MapSource {
        fd: raw.fd,
        map_offset: raw.mapoffset,
        max_size: raw.maxsize,
    };

    let chunk = data.chunk();
    let chunk = ChunkInfo {
        offset: chunk.offset(),
        size: chunk.size(),
        stride: chunk.stride(),
    };

    let memory = match kind {
        spa_sys::SPA_DATA_MemPtr => match data.data() {
            Some(bytes) => BufferMemory::Pointer(&*bytes),
            None => BufferMemory::Unsupported(kind),
        },
        spa_sys::SPA_DATA_MemFd => BufferMemory::SharedMemory(map),
        spa_sys::SPA_DATA_DmaBuf => BufferMemory::DmaBuf { map, mappable },
        other => BufferMemory::Unsupported(other),
    };

    InboundBuffer { memory, chunk }
}

fn format_pod() -> Result<Vec<u8>, StreamError> {
    let obj = pw::spa::pod::object!(
        SpaTypes::ObjectParamFormat,
        ParamType::EnumFormat,
        pw::spa::pod::property!(FormatProperties::MediaType, Id, MediaType::Video),
        pw::spa::pod::property!(FormatProperties::MediaSubtype, Id, MediaSubtype::Raw),
        pw::spa::pod::property!(
            FormatProperties::VideoFormat,
            Choice,
            Enum,
            Id,
            VideoFormat::BGRx,
            VideoFormat::RGBx,
            VideoFormat::BGRx,
            VideoFormat::xRGB,
            VideoFormat::xBGR,
            VideoFormat::RGBA,
            VideoFormat::BGRA,
            VideoFormat::ARGB,
            VideoFormat::ABGR,
            VideoFormat::RGB,
            VideoFormat::BGR
        ),
        pw::spa::pod::property!(
            FormatProperties::VideoSize,
            Choice,
            Range,
            Rectangle,
            pw::spa::utils::Rectangle { width: 1920, height: 1080 },
            pw::spa::utils::Rectangle { width: 1, height: 1 },
            pw::spa::utils::Rectangle { width: 8192, height: 8192 }
        ),
        pw::spa::pod::property!(
            FormatProperties::VideoFramerate,
            Choice,
            Range,
            Fraction,
            pw::spa::utils::Fraction { num: 30, denom: 1 },
            pw::spa::utils::Fraction { num: 0, denom: 1 },
            pw::spa::utils::Fraction { num: 1000, denom: 1 }
        ),
    );

    let values: Vec<u8> = PodSerializer::serialize(
        std::io::Cursor::new(Vec::new()),
        &pw::spa::pod::Value::Object(obj),
    )
    .map_err(|e| {
        tracing::error!(target: "bridge", "[PIPEWIRE] Failed to serialize format pod: {:?}", e);
        StreamError::InitFailed(format!("Failed to serialize format pod: {:?}", e))
    })?
    .0
    .into_inner();

    Ok(values)
}

/// Connects to `node_id` over the portal fd and feeds every buffer to
/// `driver` until a side effect asks the loop to quit.
///
/// Returns the side effects the loop could not execute itself
/// (`ReleaseResources`), in the order they were produced.
pub fn run_stream_loop<S: FrameSink + 'static>(
    pipewire_fd: OwnedFd,
    node_id: u32,
    driver: Rc<RefCell<PipelineDriver<S>>>,
    shutdown: Arc<AtomicBool>,
    activity: SessionActivity,
) -> Result<Vec<SideEffect>, StreamError> {
    tracing::info!(target: "bridge", "[PIPEWIRE] Initializing stream: node_id={}", node_id);

    pw::init();

    let mainloop = pw::main_loop::MainLoop::new(None).map_err(|e| {
        tracing::error!(target: "bridge", "[PIPEWIRE] Failed to create main loop: {}", e);
        StreamError::InitFailed(format!("Failed to create main loop: {}", e))
    })?;

    let mut guard = LoopGuard::new(mainloop);

    let context = pw::context::Context::new(guard.mainloop()).map_err(|e| {
        tracing::error!(target: "bridge", "[PIPEWIRE] Failed to create context: {}", e);
        StreamError::InitFailed(format!("Failed to create context: {}", e))
    })?;

    let core = context.connect_fd(pipewire_fd, None).map_err(|e| {
        tracing::error!(target: "bridge", "[PIPEWIRE] Failed to connect with fd: {}", e);
        StreamError::InitFailed(format!("Failed to connect with fd: {}", e))
    })?;

    tracing::debug!(target: "bridge", "[PIPEWIRE] Connected to core via portal fd");

    let stream = pw::stream::Stream::new(
        &core,
        "gnome-v4l2-capture",
        pw::properties::properties! {
            *pw::keys::MEDIA_TYPE => "Video",
            *pw::keys::MEDIA_CATEGORY => "Capture",
            *pw::keys::MEDIA_ROLE => "Screen",
        },
    )
    .map_err(|e| {
        tracing::error!(target: "bridge", "[PIPEWIRE] Failed to create stream: {}", e);
        StreamError::InitFailed(format!("Failed to create stream: {}", e))
    })?;

    let router = EffectRouter {
        mainloop: guard.mainloop().clone(),
        deferred: Rc::new(RefCell::new(Vec::new())),
    };

    let driver_state = Rc::clone(&driver);
    let driver_param = Rc::clone(&driver);
    let driver_process = Rc::clone(&driver);
    let router_state = router.clone();
    let router_param = router.clone();
    let router_process = router.clone();
    let activity_process = activity.clone();
    let multi_plane_logged = Cell::new(false);

    let _listener = stream
        .add_local_listener_with_user_data(())
        .state_changed(move |_stream, _user_data, old, new| {
            tracing::debug!(target: "bridge", "[PIPEWIRE] Stream state: {:?} -> {:?}", old, new);

            if let StreamState::Error(message) = new {
                tracing::error!(target: "bridge", "[PIPEWIRE] Stream error: {}", message);
                if message.contains(NO_FORMATS_HINT) {
                    tracing::error!(
                        target: "bridge",
                        "[PIPEWIRE] The compositor offered none of the supported pixel layouts"
                    );
                }
                let Ok(mut driver) = driver_state.try_borrow_mut() else {
                    return;
                };
                let effects = driver.handle(PipelineEvent::Fatal {
                    error: format!("PipeWire stream error: {}", message),
                });
                drop(driver);
                router_state.apply(effects);
            }
        })
        .param_changed(move |_stream, _user_data, id, param| {
            let Some(param) = param else { return };

            if id == ParamType::Buffers.as_raw() {
                tracing::debug!(target: "bridge", "[PIPEWIRE] Buffer parameters accepted");
                return;
            }
            if id != ParamType::Format.as_raw() {
                return;
            }

            let format = match parse_format(param) {
                Ok(format) => format,
                Err(e) => {
                    tracing::warn!(target: "bridge", "[PIPEWIRE] Ignoring format: {}", e);
                    return;
                }
            };

            tracing::info!(
                target: "bridge",
                "[PIPEWIRE] Format negotiated: {} {}",
                format.geometry,
                format.layout
            );

            let Ok(mut driver) = driver_param.try_borrow_mut() else {
                return;
            };
            let effects = driver.handle(PipelineEvent::FormatChanged { format });
            drop(driver);
            router_param.apply(effects);
        })
        .process(move |stream, _user_data| {
            let Some(mut buffer) = stream.dequeue_buffer() else {
                return;
            };

            let datas = buffer.datas_mut();
            if datas.is_empty() {
                return;
            }
            if datas.len() > 1 && !multi_plane_logged.replace(true) {
                tracing::debug!(
                    target: "bridge",
                    "[PIPEWIRE] Buffer has {} planes, using plane 0",
                    datas.len()
                );
            }

            let inbound = inbound_buffer(&mut datas[0]);

            let Ok(mut driver) = driver_process.try_borrow_mut() else {
                return;
            };
            let (_outcome, effects) = driver.on_buffer(inbound, activity_process.is_active());

            let stats = driver.processor().stats();
            if stats.received > 0 && stats.received % PROGRESS_EVERY == 0 {
                tracing::debug!(
                    target: "bridge",
                    "[FRAME] Progress: received={} written={} skipped={}",
                    stats.received,
                    stats.written,
                    stats.skipped
                );
            }
            drop(driver);
            router_process.apply(effects);
        })
        .register()
        .map_err(|e| {
            tracing::error!(target: "bridge", "[PIPEWIRE] Failed to register stream listener: {}", e);
            StreamError::InitFailed(format!("Failed to register listener: {}", e))
        })?;

    let values = format_pod()?;
    let pod = Pod::from_bytes(&values).ok_or_else(|| {
        tracing::error!(target: "bridge", "[PIPEWIRE] Failed to parse serialized format pod");
        StreamError::InitFailed("Failed to parse serialized format pod".to_string())
    })?;
    let mut params = [pod];

    stream
        .connect(
            pw::spa::utils::Direction::Input,
            Some(node_id),
            StreamFlags::AUTOCONNECT,
            &mut params,
        )
        .map_err(|e| {
            tracing::error!(target: "bridge", "[PIPEWIRE] Failed to connect stream: {}", e);
            StreamError::ConnectFailed(e.to_string())
        })?;

    tracing::info!(target: "bridge", "[PIPEWIRE] Stream connected, entering main loop");

    let driver_timer = Rc::clone(&driver);
    let router_timer = router.clone();
    let timer_callback = move |_expirations: u64| {
        let event = if shutdown.load(Ordering::SeqCst) {
            PipelineEvent::TerminationRequested
        } else if !activity.is_active() {
            PipelineEvent::SessionClosed
        } else {
            return;
        };

        let Ok(mut driver) = driver_timer.try_borrow_mut() else {
            return;
        };
        tracing::debug!(target: "bridge", "[PIPEWIRE] Loop timer observed {:?}", event);
        let effects = driver.handle(event);
        drop(driver);
        router_timer.apply(effects);
    };

    {
        let timer = guard.mainloop().loop_().add_timer(timer_callback);
        let _ = timer.update_timer(Some(POLL_INTERVAL), Some(POLL_INTERVAL));

        guard.run();
    }

    tracing::debug!(target: "bridge", "[PIPEWIRE] Main loop exited");

    if let Err(e) = stream.disconnect() {
        tracing::debug!(target: "bridge", "[PIPEWIRE] Stream disconnect: {}", e);
    }

    guard.mark_completed();

    let deferred = router.deferred.take();
    Ok(deferred)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_pod_serializes() {
        let values = format_pod().unwrap();
        assert!(Pod::from_bytes(&values).is_some());
    }
}
