//! wgpu-backed [`DeviceBackend`].
//!
//! Buffers are [`DeviceBuffer`]s keyed by handle. Draws are not encoded
//! here: they are queued as [`QueuedDraw`]s carrying the wgpu buffers to
//! bind, and the application's point pipeline drains them with
//! [`WgpuDevice::take_draws`] while recording its render pass. Draws that
//! read host arrays are staged into per-cloud scratch buffers first.

use rustc_hash::FxHashMap;

use super::dynamic_buffer::DeviceBuffer;
use super::{BufferHandle, ContextId, DeviceBackend, DrawCall, DrawSource, PointStyle};

/// Initial capacity of a freshly created buffer, in bytes.
const INITIAL_CAPACITY: usize = 4096;

const VERTEX_USAGE: wgpu::BufferUsages = wgpu::BufferUsages::VERTEX;

/// A draw ready to be encoded by the point pipeline.
#[derive(Debug, Clone)]
pub struct QueuedDraw {
    /// Cloud name.
    pub cloud: String,
    /// Position stream (`[f32; 3]` per point).
    pub vertices: wgpu::Buffer,
    /// Color stream (`[f32; 4]` per point).
    pub colors: Option<wgpu::Buffer>,
    /// Points to draw.
    pub count: u32,
    /// Rendering attributes.
    pub style: PointStyle,
}

/// Scratch buffers used to stage host-array draws of one cloud.
struct Scratch {
    vertices: DeviceBuffer,
    colors: DeviceBuffer,
}

/// Device backend over a wgpu device and queue.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    context: ContextId,
    buffers: FxHashMap<BufferHandle, DeviceBuffer>,
    scratch: FxHashMap<String, Scratch>,
    next_handle: u32,
    draws: Vec<QueuedDraw>,
}

impl WgpuDevice {
    /// Wrap an existing device and queue.
    #[must_use]
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            context: ContextId::fresh(),
            buffers: FxHashMap::default(),
            scratch: FxHashMap::default(),
            next_handle: 1,
            draws: Vec::new(),
        }
    }

    /// Request a surfaceless adapter and device.
    ///
    /// # Errors
    ///
    /// Returns a description of the failure if no adapter or device could
    /// be obtained.
    pub async fn request() -> Result<Self, String> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                ..Default::default()
            })
            .await
            .map_err(|e| format!("no compatible GPU adapter found: {e}"))?;
        log::info!("using adapter {}", adapter.get_info().name);
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("nuage device"),
                ..Default::default()
            })
            .await
            .map_err(|e| format!("device request failed: {e}"))?;
        Ok(Self::new(device, queue))
    }

    /// Switch to a new device (e.g. after device loss). Every buffer issued
    /// so far is dropped and a new context identity is reported, so clouds
    /// regenerate their data on their next draw.
    pub fn replace_context(&mut self, device: wgpu::Device, queue: wgpu::Queue) {
        log::info!(
            "rendering context replaced, dropping {} buffers",
            self.buffers.len()
        );
        self.device = device;
        self.queue = queue;
        self.buffers.clear();
        self.scratch.clear();
        self.context = ContextId::fresh();
    }

    /// Underlying wgpu device.
    #[must_use]
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Underlying wgpu buffer of `handle`.
    #[must_use]
    pub fn buffer(&self, handle: BufferHandle) -> Option<&wgpu::Buffer> {
        self.buffers.get(&handle).map(DeviceBuffer::buffer)
    }

    /// Drain the draws queued since the last call.
    pub fn take_draws(&mut self) -> Vec<QueuedDraw> {
        std::mem::take(&mut self.draws)
    }

    fn stage_host_draw(
        &mut self,
        cloud: &str,
        points: &[glam::Vec3],
        colors: Option<&[glam::Vec4]>,
    ) -> (wgpu::Buffer, Option<wgpu::Buffer>) {
        let device = &self.device;
        let scratch = self.scratch.entry(cloud.to_owned()).or_insert_with(|| Scratch {
            vertices: DeviceBuffer::new(
                device,
                &format!("{cloud} host vertices"),
                INITIAL_CAPACITY,
                VERTEX_USAGE,
            ),
            colors: DeviceBuffer::new(
                device,
                &format!("{cloud} host colors"),
                INITIAL_CAPACITY,
                VERTEX_USAGE,
            ),
        });
        let _ = scratch
            .vertices
            .write(device, &self.queue, bytemuck::cast_slice(points));
        let colors = colors.map(|colors| {
            let _ = scratch
                .colors
                .write(device, &self.queue, bytemuck::cast_slice(colors));
            scratch.colors.buffer().clone()
        });
        (scratch.vertices.buffer().clone(), colors)
    }
}

impl DeviceBackend for WgpuDevice {
    fn context_id(&self) -> ContextId {
        self.context
    }

    fn create_buffer(&mut self, label: &str) -> BufferHandle {
        let handle = BufferHandle(self.next_handle);
        self.next_handle += 1;
        let buffer =
            DeviceBuffer::new(&self.device, label, INITIAL_CAPACITY, VERTEX_USAGE);
        drop(self.buffers.insert(handle, buffer));
        handle
    }

    fn upload(&mut self, buffer: BufferHandle, data: &[u8]) {
        let Some(target) = self.buffers.get_mut(&buffer) else {
            log::warn!("upload to unknown buffer {buffer:?}");
            return;
        };
        let _ = target.write(&self.device, &self.queue, data);
    }

    fn release(&mut self, buffer: BufferHandle) {
        if let Some(released) = self.buffers.remove(&buffer) {
            released.buffer().destroy();
        }
    }

    fn submit(&mut self, draw: DrawCall<'_>) {
        let (vertices, colors) = match draw.source {
            DrawSource::Buffers { vertices, colors } => {
                let Some(v) = self.buffer(vertices).cloned() else {
                    log::warn!("draw of \"{}\" skipped: stale buffer", draw.cloud);
                    return;
                };
                (v, colors.and_then(|c| self.buffer(c).cloned()))
            }
            DrawSource::Host { points, colors } => {
                self.stage_host_draw(draw.cloud, points, colors)
            }
        };
        self.draws.push(QueuedDraw {
            cloud: draw.cloud.to_owned(),
            vertices,
            colors,
            count: draw.count,
            style: draw.style,
        });
    }
}

impl std::fmt::Debug for WgpuDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuDevice")
            .field("context", &self.context)
            .field("buffers", &self.buffers.len())
            .field("queued_draws", &self.draws.len())
            .finish_non_exhaustive()
    }
}
