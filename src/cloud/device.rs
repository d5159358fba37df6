//! Device-buffer handles of one cloud and the context they belong to.

use glam::{Vec3, Vec4};

use crate::gpu::{BufferHandle, ContextId, DeviceBackend};

/// Vertex and color buffer handles, valid only under `context`.
#[derive(Debug, Default)]
pub(crate) struct DeviceBuffers {
    pub(crate) vertices: Option<BufferHandle>,
    pub(crate) colors: Option<BufferHandle>,
    context: Option<ContextId>,
}

impl DeviceBuffers {
    /// Whether the handles were issued by the context now in effect.
    pub(crate) fn is_current(&self, device: &dyn DeviceBackend) -> bool {
        self.context == Some(device.context_id())
    }

    /// Allocate fresh handles under the current context. Handles from an
    /// older context are dead and are forgotten, not released.
    pub(crate) fn reallocate(&mut self, device: &mut dyn DeviceBackend, name: &str) {
        if self.is_current(device) {
            self.release(device);
        }
        self.vertices = Some(device.create_buffer(&format!("{name} vertices")));
        self.colors = None;
        self.context = Some(device.context_id());
        log::debug!("[{name}] allocated device buffers");
    }

    /// Copy host arrays into the device buffers, creating the color buffer
    /// on first colored upload.
    pub(crate) fn upload(
        &mut self,
        device: &mut dyn DeviceBackend,
        name: &str,
        points: &[Vec3],
        colors: Option<&[Vec4]>,
    ) {
        if !self.is_current(device) {
            self.reallocate(device, name);
        }
        if let Some(vertices) = self.vertices {
            device.upload(vertices, bytemuck::cast_slice(points));
        }
        match colors {
            Some(colors) => {
                let handle = *self
                    .colors
                    .get_or_insert_with(|| device.create_buffer(&format!("{name} colors")));
                device.upload(handle, bytemuck::cast_slice(colors));
            }
            None => {
                if let Some(stale) = self.colors.take() {
                    device.release(stale);
                }
            }
        }
        log::debug!("[{name}] uploaded {} points", points.len());
    }

    /// Free the handles if they are still alive.
    pub(crate) fn release(&mut self, device: &mut dyn DeviceBackend) {
        if self.is_current(device) {
            for handle in [self.vertices.take(), self.colors.take()].into_iter().flatten() {
                device.release(handle);
            }
        }
        self.vertices = None;
        self.colors = None;
        self.context = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HeadlessDevice;

    #[test]
    fn upload_allocates_on_demand() {
        let mut device = HeadlessDevice::new();
        let mut buffers = DeviceBuffers::default();
        assert!(!buffers.is_current(&device));

        buffers.upload(&mut device, "c", &[Vec3::ONE], Some(&[Vec4::ONE]));
        assert!(buffers.is_current(&device));
        assert_eq!(device.live_buffers(), 2);
        assert_eq!(device.upload_count(), 2);

        buffers.upload(&mut device, "c", &[Vec3::ONE], None);
        assert_eq!(device.live_buffers(), 1);
    }

    #[test]
    fn stale_handles_are_not_released_into_new_context() {
        let mut device = HeadlessDevice::new();
        let mut buffers = DeviceBuffers::default();
        buffers.upload(&mut device, "c", &[Vec3::ZERO], None);
        device.invalidate_context();
        let survivor = device.create_buffer("other");

        buffers.release(&mut device);
        assert!(device.buffer_bytes(survivor).is_some());
        assert!(buffers.vertices.is_none());
    }
}
