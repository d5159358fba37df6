//! In-memory [`DeviceBackend`] that keeps uploaded bytes on the host.
//!
//! Used by the test suite and by the command-line tool when no GPU adapter
//! is available. Context loss can be simulated with
//! [`HeadlessDevice::invalidate_context`].

use rustc_hash::FxHashMap;

use super::{BufferHandle, ContextId, DeviceBackend, DrawCall, DrawSource, PointStyle};

/// Summary of one submitted draw.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedDraw {
    /// Cloud name.
    pub cloud: String,
    /// Points drawn.
    pub count: u32,
    /// Whether the draw read device buffers (as opposed to host arrays).
    pub from_buffers: bool,
    /// Whether a color stream was bound.
    pub colored: bool,
    /// Rendering attributes.
    pub style: PointStyle,
}

/// Host-memory device backend.
#[derive(Debug)]
pub struct HeadlessDevice {
    context: ContextId,
    buffers: FxHashMap<BufferHandle, Vec<u8>>,
    next_handle: u32,
    uploads: usize,
    draws: Vec<RecordedDraw>,
}

impl HeadlessDevice {
    /// Backend with a fresh context and no buffers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            context: ContextId::fresh(),
            buffers: FxHashMap::default(),
            next_handle: 1,
            uploads: 0,
            draws: Vec::new(),
        }
    }

    /// Simulate losing the rendering context: every buffer is gone and a
    /// new context identity is reported.
    pub fn invalidate_context(&mut self) {
        log::debug!(
            "headless context invalidated ({} buffers lost)",
            self.buffers.len()
        );
        self.buffers.clear();
        self.context = ContextId::fresh();
    }

    /// Number of uploads performed so far.
    #[must_use]
    pub fn upload_count(&self) -> usize {
        self.uploads
    }

    /// Number of allocated buffers.
    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Bytes last uploaded to `buffer`.
    #[must_use]
    pub fn buffer_bytes(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(Vec::as_slice)
    }

    /// Draws submitted since the last [`Self::take_draws`].
    #[must_use]
    pub fn draws(&self) -> &[RecordedDraw] {
        &self.draws
    }

    /// Drain the recorded draws.
    pub fn take_draws(&mut self) -> Vec<RecordedDraw> {
        std::mem::take(&mut self.draws)
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceBackend for HeadlessDevice {
    fn context_id(&self) -> ContextId {
        self.context
    }

    fn create_buffer(&mut self, _label: &str) -> BufferHandle {
        let handle = BufferHandle(self.next_handle);
        self.next_handle += 1;
        drop(self.buffers.insert(handle, Vec::new()));
        handle
    }

    fn upload(&mut self, buffer: BufferHandle, data: &[u8]) {
        if let Some(bytes) = self.buffers.get_mut(&buffer) {
            bytes.clear();
            bytes.extend_from_slice(data);
            self.uploads += 1;
        } else {
            log::warn!("upload to unknown buffer {buffer:?}");
        }
    }

    fn release(&mut self, buffer: BufferHandle) {
        drop(self.buffers.remove(&buffer));
    }

    fn submit(&mut self, draw: DrawCall<'_>) {
        let (from_buffers, colored) = match draw.source {
            DrawSource::Buffers { colors, .. } => (true, colors.is_some()),
            DrawSource::Host { colors, .. } => (false, colors.is_some()),
        };
        self.draws.push(RecordedDraw {
            cloud: draw.cloud.to_owned(),
            count: draw.count,
            from_buffers,
            colored,
            style: draw.style,
        });
    }
}
