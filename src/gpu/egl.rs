//! Headless EGL importer for DMA-BUF frames.
//!
//! One GLES2 context is made current surfaceless on the pipeline thread and
//! reused for every frame. Each import creates an `EGLImage` and a texture,
//! attaches the texture to a persistent framebuffer and reads it back with
//! `glReadPixels`. Readback is always RGBA regardless of the source fourcc.

use std::ffi::{c_void, CString};

use glow::HasContext;
use glutin::api::egl::context::PossiblyCurrentContext;
use glutin::api::egl::device::Device;
use glutin::api::egl::display::Display;
use glutin::config::{Api, ConfigSurfaceTypes, ConfigTemplateBuilder};
use glutin::context::{ContextApi, ContextAttributesBuilder, Version};
use glutin::display::{AsRawDisplay, GetDisplayExtensions, RawDisplay};
use glutin::prelude::*;

use super::{DmaBufDescriptor, DmaBufImporter};
use crate::errors::ImportError;

const DMA_BUF_IMPORT_EXTENSION: &str = "EGL_EXT_image_dma_buf_import";

const EGL_NONE: i32 = 0x3038;
const EGL_WIDTH: i32 = 0x3057;
const EGL_HEIGHT: i32 = 0x3056;
const EGL_LINUX_DMA_BUF_EXT: u32 = 0x3270;
const EGL_LINUX_DRM_FOURCC_EXT: i32 = 0x3271;
const EGL_DMA_BUF_PLANE0_FD_EXT: i32 = 0x3272;
const EGL_DMA_BUF_PLANE0_OFFSET_EXT: i32 = 0x3273;
const EGL_DMA_BUF_PLANE0_PITCH_EXT: i32 = 0x3274;

type EglImage = *mut c_void;
type CreateImageFn = unsafe extern "system" fn(
    display: *const c_void,
    context: *const c_void,
    target: u32,
    buffer: *const c_void,
    attribs: *const i32,
) -> EglImage;
type DestroyImageFn = unsafe extern "system" fn(display: *const c_void, image: EglImage) -> u32;
type ImageTargetTextureFn = unsafe extern "system" fn(target: u32, image: EglImage);
type GetErrorFn = unsafe extern "system" fn() -> i32;

struct ExtensionFns {
    create_image: CreateImageFn,
    destroy_image: DestroyImageFn,
    image_target_texture: ImageTargetTextureFn,
    get_error: Option<GetErrorFn>,
}

pub struct EglImporter {
    gl: glow::Context,
    framebuffer: glow::NativeFramebuffer,
    fns: ExtensionFns,
    raw_display: *const c_void,
    _context: PossiblyCurrentContext,
    _display: Display,
}

impl EglImporter {
    pub fn new() -> Result<Self, ImportError> {
        let device = Device::query_devices()
            .map_err(|e| ImportError::ContextUnavailable(format!("EGL device query failed: {}", e)))?
            .next()
            .ok_or_else(|| ImportError::ContextUnavailable("no EGL devices".to_string()))?;

        tracing::debug!(
            target: "bridge",
            "[GPU] Using EGL device {:?} ({:?})",
            device.name(),
            device.vendor()
        );

        // SAFETY: no native display is passed; the device owns the platform display.
        let display = unsafe { Display::with_device(&device, None) }
            .map_err(|e| ImportError::ContextUnavailable(format!("EGL display: {}", e)))?;

        if !display.extensions().contains(DMA_BUF_IMPORT_EXTENSION) {
            return Err(ImportError::Unsupported);
        }

        let template = ConfigTemplateBuilder::new()
            .with_surface_type(ConfigSurfaceTypes::empty())
            .with_api(Api::GLES2)
            .build();

        // SAFETY: the template holds no native window handles.
        let config = unsafe { display.find_configs(template) }
            .map_err(|e| ImportError::ContextUnavailable(format!("EGL config: {}", e)))?
            .next()
            .ok_or_else(|| ImportError::ContextUnavailable("no GLES2 config".to_string()))?;

        let attributes = ContextAttributesBuilder::new()
            .with_context_api(ContextApi::Gles(Some(Version::new(2, 0))))
            .build(None);

        // SAFETY: config was produced by this display.
        let context = unsafe { display.create_context(&config, &attributes) }
            .map_err(|e| ImportError::ContextUnavailable(format!("GLES2 context: {}", e)))?
            .make_current_surfaceless()
            .map_err(|e| ImportError::ContextUnavailable(format!("make current: {}", e)))?;

        let raw_display = match display.raw_display() {
            RawDisplay::Egl(ptr) => ptr,
            #[allow(unreachable_patterns)]
            _ => return Err(ImportError::ContextUnavailable("not an EGL display".to_string())),
        };

        let fns = Self::load_extension_fns(&display)?;

        // SAFETY: the context is current on this thread.
        let gl = unsafe {
            glow::Context::from_loader_function(|name| match CString::new(name) {
                Ok(c_name) => display.get_proc_address(c_name.as_c_str()),
                Err(_) => std::ptr::null(),
            })
        };

        // SAFETY: the context is current on this thread.
        let framebuffer = unsafe { gl.create_framebuffer() }
            .map_err(|e| ImportError::ContextUnavailable(format!("framebuffer: {}", e)))?;

        // SAFETY: plain state queries on the current context.
        unsafe {
            tracing::info!(
                target: "bridge",
                "[GPU] {} / {} / {}",
                gl.get_parameter_string(glow::VENDOR),
                gl.get_parameter_string(glow::RENDERER),
                gl.get_parameter_string(glow::VERSION)
            );
        }

        Ok(Self {
            gl,
            framebuffer,
            fns,
            raw_display,
            _context: context,
            _display: display,
        })
    }

    fn load_extension_fns(display: &Display) -> Result<ExtensionFns, ImportError> {
        let lookup = |name: &str| -> *const c_void {
            match CString::new(name) {
                Ok(c_name) => display.get_proc_address(c_name.as_c_str()),
                Err(_) => std::ptr::null(),
            }
        };

        let create = lookup("eglCreateImageKHR");
        let destroy = lookup("eglDestroyImageKHR");
        let target = lookup("glEGLImageTargetTexture2DOES");
        let get_error = lookup("eglGetError");

        if create.is_null() || destroy.is_null() || target.is_null() {
            return Err(ImportError::ContextUnavailable(
                "missing EGLImage entry points".to_string(),
            ));
        }

        // SAFETY: non-null addresses returned by eglGetProcAddress for these
        // names have exactly these signatures.
        unsafe {
            Ok(ExtensionFns {
                create_image: std::mem::transmute::<*const c_void, CreateImageFn>(create),
                destroy_image: std::mem::transmute::<*const c_void, DestroyImageFn>(destroy),
                image_target_texture: std::mem::transmute::<*const c_void, ImageTargetTextureFn>(
                    target,
                ),
                get_error: (!get_error.is_null())
                    .then(|| std::mem::transmute::<*const c_void, GetErrorFn>(get_error)),
            })
        }
    }

    fn last_egl_error(&self) -> i32 {
        match self.fns.get_error {
            // SAFETY: resolved from the same display.
            Some(get_error) => unsafe { get_error() },
            None => 0,
        }
    }
}

/// Destroys the `EGLImage` when dropped.
struct ImageGuard<'a> {
    importer: &'a EglImporter,
    image: EglImage,
}

impl Drop for ImageGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: the image was created on this display and is destroyed once.
        unsafe {
            (self.importer.fns.destroy_image)(self.importer.raw_display, self.image);
        }
    }
}

/// Deletes the texture and unbinds texture and framebuffer when dropped.
struct TextureGuard<'a> {
    gl: &'a glow::Context,
    texture: glow::NativeTexture,
}

impl Drop for TextureGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: same thread and context as creation.
        unsafe {
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            self.gl.bind_texture(glow::TEXTURE_2D, None);
            self.gl.delete_texture(self.texture);
        }
    }
}

impl DmaBufImporter for EglImporter {
    fn supports_import(&self) -> bool {
        true
    }

    fn import(&mut self, desc: &DmaBufDescriptor, out: &mut [u8]) -> Result<(), ImportError> {
        if desc.fd < 0 || desc.fd > i32::MAX as i64 {
            return Err(ImportError::InvalidFd(desc.fd));
        }
        let required = desc.readback_len();
        if out.len() < required {
            return Err(ImportError::BufferTooSmall {
                actual: out.len(),
                required,
            });
        }

        let attribs = [
            EGL_WIDTH,
            desc.width as i32,
            EGL_HEIGHT,
            desc.height as i32,
            EGL_LINUX_DRM_FOURCC_EXT,
            desc.fourcc as i32,
            EGL_DMA_BUF_PLANE0_FD_EXT,
            desc.fd as i32,
            EGL_DMA_BUF_PLANE0_OFFSET_EXT,
            desc.offset as i32,
            EGL_DMA_BUF_PLANE0_PITCH_EXT,
            desc.stride as i32,
            EGL_NONE,
        ];

        // SAFETY: attribs is EGL_NONE terminated; the fd stays open for the call.
        let image = unsafe {
            (self.fns.create_image)(
                self.raw_display,
                std::ptr::null(),
                EGL_LINUX_DMA_BUF_EXT,
                std::ptr::null(),
                attribs.as_ptr(),
            )
        };
        if image.is_null() {
            return Err(ImportError::CreateImage(self.last_egl_error()));
        }
        let image = ImageGuard {
            importer: self,
            image,
        };

        let gl = &self.gl;
        // SAFETY: context is current; every object created here is released by a guard.
        unsafe {
            let texture = gl
                .create_texture()
                .map_err(|_| ImportError::BindTexture(gl.get_error()))?;
            let _texture = TextureGuard { gl, texture };

            gl.bind_texture(glow::TEXTURE_2D, Some(texture));
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, glow::NEAREST as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, glow::NEAREST as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE as i32);

            (self.fns.image_target_texture)(glow::TEXTURE_2D, image.image);
            let err = gl.get_error();
            if err != glow::NO_ERROR {
                return Err(ImportError::BindTexture(err));
            }

            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(self.framebuffer));
            gl.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                Some(texture),
                0,
            );

            let status = gl.check_framebuffer_status(glow::FRAMEBUFFER);
            if status != glow::FRAMEBUFFER_COMPLETE {
                return Err(ImportError::IncompleteFramebuffer(status));
            }

            gl.viewport(0, 0, desc.width as i32, desc.height as i32);
            gl.read_pixels(
                0,
                0,
                desc.width as i32,
                desc.height as i32,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                glow::PixelPackData::Slice(&mut out[..required]),
            );

            let err = gl.get_error();
            if err != glow::NO_ERROR {
                return Err(ImportError::Readback(err));
            }
        }

        Ok(())
    }
}

impl Drop for EglImporter {
    fn drop(&mut self) {
        // SAFETY: context is still current; framebuffer was created on it.
        unsafe {
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            self.gl.delete_framebuffer(self.framebuffer);
        }
        tracing::debug!(target: "bridge", "[GPU] EGL importer released");
    }
}
