//! Device-buffer seam between clouds and the rendering collaborator.
//!
//! Clouds never talk to a graphics API directly. They allocate, fill and
//! release opaque [`BufferHandle`]s through a [`DeviceBackend`], and hand a
//! [`DrawCall`] to it once per render pass. The backend reports the
//! identity of the context the handles belong to; when that identity
//! changes every handle issued before is dead.

/// Growable GPU buffers with automatic reallocation.
pub mod dynamic_buffer;
/// CPU-side backend used for tests and headless runs.
pub mod headless;
/// wgpu-backed implementation of [`DeviceBackend`].
pub mod wgpu_device;

use std::sync::atomic::{AtomicU64, Ordering};

use glam::{Vec3, Vec4};

pub use headless::HeadlessDevice;
pub use wgpu_device::WgpuDevice;

/// Identity of a rendering context. Buffers created under one context are
/// unusable under another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    /// A context identity never handed out before in this process.
    #[must_use]
    pub fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Opaque name of a device buffer, scoped to the context that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u32);

/// Per-cloud point rendering attributes, forwarded with every draw.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PointStyle {
    /// Point size in logical pixels; `None` keeps the renderer's default.
    pub size: Option<f32>,
    /// Draw points as textured sprites.
    pub sprites: bool,
    /// Let the vertex program choose the point size.
    pub programmable_size: bool,
}

/// Where the vertices of a draw come from.
#[derive(Debug, Clone, Copy)]
pub enum DrawSource<'a> {
    /// Device-resident buffers.
    Buffers {
        /// Positions (`[f32; 3]` per point).
        vertices: BufferHandle,
        /// Colors (`[f32; 4]` per point), when the cloud is colored.
        colors: Option<BufferHandle>,
    },
    /// Host arrays, used when device buffers are unavailable.
    Host {
        /// Positions.
        points: &'a [Vec3],
        /// Colors, when the cloud is colored.
        colors: Option<&'a [Vec4]>,
    },
}

/// One point-list draw request.
#[derive(Debug, Clone, Copy)]
pub struct DrawCall<'a> {
    /// Name of the cloud being drawn.
    pub cloud: &'a str,
    /// Vertex data.
    pub source: DrawSource<'a>,
    /// Number of points to draw.
    pub count: u32,
    /// Rendering attributes.
    pub style: PointStyle,
}

/// Device-buffer operations a cloud needs from the rendering collaborator.
///
/// All methods are called on the thread that owns the rendering context.
pub trait DeviceBackend {
    /// Identity of the context currently in effect.
    fn context_id(&self) -> ContextId;

    /// Allocate a new, empty buffer.
    fn create_buffer(&mut self, label: &str) -> BufferHandle;

    /// Replace the contents of `buffer` with `data`.
    fn upload(&mut self, buffer: BufferHandle, data: &[u8]);

    /// Free `buffer`. Unknown handles are ignored.
    fn release(&mut self, buffer: BufferHandle);

    /// Issue (or queue) a draw.
    fn submit(&mut self, draw: DrawCall<'_>);
}
