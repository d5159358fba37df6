//! Growable device buffer backing one [`BufferHandle`](super::BufferHandle).
//!
//! Point clouds are re-uploaded whole whenever they change, so a buffer only
//! needs to grow: a 2x growth strategy keeps reallocations rare while a
//! cloud is being filled, and the buffer never shrinks (GPU buffers cannot
//! be resized in place).

/// A GPU buffer that grows when an upload exceeds its capacity.
pub struct DeviceBuffer {
    buffer: wgpu::Buffer,
    capacity: usize, // Capacity in bytes
    len: usize,      // Current data length in bytes
    usage: wgpu::BufferUsages,
    label: String,
}

impl DeviceBuffer {
    /// Smallest allocation, so empty clouds still get a bindable buffer.
    const MIN_CAPACITY: usize = 64;

    /// Empty buffer with the given initial byte capacity.
    #[must_use]
    pub fn new(
        device: &wgpu::Device,
        label: &str,
        initial_capacity: usize,
        usage: wgpu::BufferUsages,
    ) -> Self {
        let capacity = initial_capacity.max(Self::MIN_CAPACITY);
        Self {
            buffer: allocate(device, label, capacity, usage),
            capacity,
            len: 0,
            usage,
            label: label.to_owned(),
        }
    }

    /// Replace the buffer contents, reallocating when `data` does not fit.
    ///
    /// Returns `true` if the buffer was reallocated (bind groups referring
    /// to the old one need recreation).
    pub fn write(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        data: &[u8],
    ) -> bool {
        let needed = data.len();

        let reallocated = if let Some(new_capacity) = grown_capacity(self.capacity, needed) {
            log::debug!(
                "growing buffer \"{}\" {} -> {} bytes",
                self.label,
                self.capacity,
                new_capacity
            );
            self.buffer = allocate(device, &self.label, new_capacity, self.usage);
            self.capacity = new_capacity;
            true
        } else {
            false
        };

        if needed > 0 {
            queue.write_buffer(&self.buffer, 0, data);
        }
        self.len = needed;

        reallocated
    }

    /// Underlying wgpu buffer.
    #[must_use]
    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// Bytes currently holding valid data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no data has been uploaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Allocated size in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Capacity to reallocate to when `needed` bytes exceed `capacity`:
/// 2x growth, by at least 1KB.
const fn grown_capacity(capacity: usize, needed: usize) -> Option<usize> {
    if needed <= capacity {
        return None;
    }
    let doubled = needed.saturating_mul(2);
    let stepped = capacity.saturating_add(1024);
    Some(if doubled > stepped { doubled } else { stepped })
}

fn allocate(
    device: &wgpu::Device,
    label: &str,
    size: usize,
    usage: wgpu::BufferUsages,
) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: size as u64,
        usage: usage | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}
