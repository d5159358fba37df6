//! One named point cloud and the lifecycle of its data.
//!
//! Point data lives in host memory, in device buffers, or in both:
//!
//! - **Empty**: no points.
//! - **Loading**: a load task is filling the host arrays.
//! - **Ready**: host arrays are authoritative; device buffers, when
//!   available, mirror them and are refreshed lazily on draw.
//! - **Optimized**: host arrays were discarded after upload. The data can
//!   only be rebuilt by replaying the recorded [`SourceDescriptor`], which
//!   happens automatically when the rendering context changes.
//!
//! Every method runs on the owner thread. Load tasks only touch the host
//! arrays and load progress, behind a per-cloud lock.

mod device;
mod host;
mod loader;

use std::sync::Arc;

use glam::{Vec3, Vec4};
use rand::Rng;

use self::device::DeviceBuffers;
use self::host::{CloudShared, Progress, DEFAULT_COLOR};
use self::loader::{LoadOutcome, LoadRequest};
use crate::error::CloudError;
use crate::gpu::{DeviceBackend, DrawCall, DrawSource, PointStyle};
use crate::options::LoadingOptions;
use crate::source::SourceDescriptor;
use crate::task::{Task, TaskScheduler};

/// CPU/GPU storage and provenance of one named cloud.
pub struct CloudBuffer {
    shared: Arc<CloudShared>,
    task: Arc<Task>,
    source: Option<SourceDescriptor>,
    /// Device buffers may be used at all.
    device_buffers: bool,
    loading: LoadingOptions,
    gpu: DeviceBuffers,
    optimized: bool,
    optimized_count: usize,
    /// Data was edited point by point and cannot be regenerated.
    no_optimize: bool,
    /// A network source was recorded and its bytes have not arrived yet.
    awaiting_transfer: bool,
    /// Coloredness the awaited transfer must reproduce when it rebuilds an
    /// optimized cloud.
    transfer_colored: Option<bool>,
    style: PointStyle,
}

impl CloudBuffer {
    /// Empty cloud. With `device_buffers` false the cloud stays host-only
    /// and [`Self::optimize`] is always refused.
    #[must_use]
    pub fn new(name: &str, device_buffers: bool, loading: LoadingOptions) -> Self {
        let shared = Arc::new(CloudShared::new(name));
        let body = Arc::clone(&shared);
        let task = Task::new(format!("load {name}"), move |ctx| {
            let request = body.request.lock().clone();
            let Some(request) = request else {
                return;
            };
            if let Err(e) = loader::execute(&body, &request, &|| ctx.interrupted()) {
                body.fail(e);
            }
        });
        Self {
            shared,
            task,
            source: None,
            device_buffers,
            loading,
            gpu: DeviceBuffers::default(),
            optimized: false,
            optimized_count: 0,
            no_optimize: false,
            awaiting_transfer: false,
            transfer_colored: None,
            style: PointStyle::default(),
        }
    }

    /// Cloud name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Number of points, whether held on the host or only on the device.
    #[must_use]
    pub fn size(&self) -> usize {
        if self.optimized {
            self.optimized_count
        } else {
            self.shared.host.lock().points.len()
        }
    }

    /// Whether points carry a color.
    #[must_use]
    pub fn is_colored(&self) -> bool {
        self.shared.host.lock().colored
    }

    /// Whether host data has been discarded in favor of device buffers.
    #[must_use]
    pub fn is_optimized(&self) -> bool {
        self.optimized
    }

    /// Whether a load is queued, running or waiting for network bytes.
    #[must_use]
    pub fn loading(&self) -> bool {
        self.shared.progress.loading()
    }

    /// Raw progress: `-1` never loaded, `[0, 1)` loading, `1` complete.
    #[must_use]
    pub fn load_progress(&self) -> f32 {
        self.shared.progress.get()
    }

    /// Recorded provenance of the current data.
    #[must_use]
    pub fn source(&self) -> Option<&SourceDescriptor> {
        self.source.as_ref()
    }

    /// Host copy of the points (empty once optimized).
    #[must_use]
    pub fn points(&self) -> Vec<Vec3> {
        self.shared.host.lock().points.clone()
    }

    /// Host copy of the colors (empty for uncolored or optimized clouds).
    #[must_use]
    pub fn colors(&self) -> Vec<Vec4> {
        self.shared.host.lock().colors.clone()
    }

    /// Retrieve and clear the last recorded error.
    pub fn take_error(&self) -> Option<CloudError> {
        self.shared.host.lock().last_error.take()
    }

    /// Rendering attributes forwarded with every draw.
    #[must_use]
    pub fn style(&self) -> PointStyle {
        self.style
    }

    /// Replace the rendering attributes.
    pub fn set_style(&mut self, style: PointStyle) {
        self.style = style;
    }

    /// URL of a network source whose bytes are still expected.
    #[must_use]
    pub fn pending_transfer(&self) -> Option<&str> {
        match &self.source {
            Some(SourceDescriptor::Network { url, .. }) if self.awaiting_transfer => {
                Some(url)
            }
            _ => None,
        }
    }

    /// Resize to exactly `count` uniformly random points in the unit cube.
    ///
    /// Returns `false` if the cloud already holds `count` points. Existing
    /// points are kept when growing; coloredness is only taken from
    /// `colored` when the cloud is empty.
    pub fn random_fill(&mut self, count: usize, colored: bool) -> bool {
        if self.size() == count {
            return false;
        }
        self.task.interrupt();
        self.leave_optimized();
        let colored = self.fill_random(count, colored);
        self.source = Some(SourceDescriptor::Random { count, colored });
        self.no_optimize = false;
        self.awaiting_transfer = false;
        self.transfer_colored = None;
        self.shared.progress.set(Progress::DONE);
        true
    }

    /// Append one point. A color is kept when the cloud is colored, or
    /// makes it colored when this is its first point; a colored cloud gives
    /// a bare point the default opaque color.
    ///
    /// # Errors
    ///
    /// [`CloudError::CannotMutateOptimizedCloud`] if the cloud is optimized;
    /// nothing is changed.
    pub fn add_point(&mut self, point: Vec3, color: Option<Vec4>) -> Result<bool, CloudError> {
        self.begin_edit()?;
        let mut host = self.shared.host.lock();
        if host.points.is_empty() {
            host.reset(color.is_some());
        }
        host.points.push(point);
        if host.colored {
            host.colors.push(color.unwrap_or(DEFAULT_COLOR));
        }
        host.dirty = true;
        drop(host);
        self.mark_edited();
        Ok(true)
    }

    /// Drop the last `count` points (all of them if `count` exceeds the
    /// size).
    ///
    /// # Errors
    ///
    /// [`CloudError::CannotMutateOptimizedCloud`] if the cloud is optimized.
    pub fn remove_points(&mut self, count: usize) -> Result<bool, CloudError> {
        self.begin_edit()?;
        if count == 0 {
            return Ok(false);
        }
        {
            let mut host = self.shared.host.lock();
            let keep = host.points.len().saturating_sub(count);
            host.truncate(keep);
        }
        self.mark_edited();
        Ok(true)
    }

    /// Load `source` asynchronously on `scheduler`.
    ///
    /// Returns `Ok(false)` if `source` is already the recorded source of a
    /// successful load. Random sources are generated immediately; network
    /// sources wait for [`Self::notify_transfer_complete`].
    ///
    /// # Errors
    ///
    /// [`CloudError::InvalidColumnIndex`] before anything changes, or a
    /// scheduler error if the load task could not be started.
    pub fn load_data(
        &mut self,
        source: SourceDescriptor,
        scheduler: &TaskScheduler,
    ) -> Result<bool, CloudError> {
        source.validate()?;
        if self.already_loaded(&source) {
            return Ok(false);
        }
        if let SourceDescriptor::Random { count, colored } = source {
            return Ok(self.random_fill(count, colored));
        }

        self.task.interrupt();
        self.leave_optimized();
        self.no_optimize = false;
        self.awaiting_transfer = false;
        self.transfer_colored = None;
        self.shared.progress.set(0.0);

        let request = match &source {
            SourceDescriptor::File { path, layout } => Some(LoadRequest::File {
                path: self.loading.resolve(path),
                layout: layout.clone(),
                colored: None,
            }),
            SourceDescriptor::Network { url, .. } => {
                log::debug!("[{}] awaiting transfer of {url}", self.name());
                self.awaiting_transfer = true;
                None
            }
            SourceDescriptor::Random { .. } => None,
        };
        self.source = Some(source);

        if let Some(request) = request {
            self.start_task(request, scheduler)?;
        }
        Ok(true)
    }

    /// Load `source` on the calling thread.
    ///
    /// # Errors
    ///
    /// [`CloudError::InvalidColumnIndex`] before anything changes,
    /// [`CloudError::SourceUnreadable`] if the file cannot be opened.
    /// Network sources cannot be read synchronously and are only recorded.
    pub fn load_data_sync(&mut self, source: SourceDescriptor) -> Result<bool, CloudError> {
        source.validate()?;
        if self.already_loaded(&source) {
            return Ok(false);
        }
        self.task.interrupt();
        self.leave_optimized();
        self.no_optimize = false;
        self.awaiting_transfer = false;
        self.transfer_colored = None;

        match source {
            SourceDescriptor::Random { count, colored } => {
                return Ok(self.random_fill(count, colored));
            }
            SourceDescriptor::File { ref path, ref layout } => {
                let request = LoadRequest::File {
                    path: self.loading.resolve(path),
                    layout: layout.clone(),
                    colored: None,
                };
                self.source = Some(source);
                let _ = loader::execute(&self.shared, &request, &|| false)
                    .inspect_err(|_| self.shared.mark_failed())?;
            }
            SourceDescriptor::Network { .. } => {
                self.source = Some(source);
                self.awaiting_transfer = true;
                self.shared.progress.set(0.0);
            }
        }
        Ok(true)
    }

    /// Hand the bytes of the recorded network source to a load task.
    ///
    /// Returns `Ok(false)` if no transfer was expected.
    ///
    /// # Errors
    ///
    /// A scheduler error if the load task could not be started.
    pub fn notify_transfer_complete(
        &mut self,
        bytes: impl Into<Arc<[u8]>>,
        scheduler: &TaskScheduler,
    ) -> Result<bool, CloudError> {
        let Some(SourceDescriptor::Network { url, layout }) = &self.source else {
            return Ok(false);
        };
        if !self.awaiting_transfer {
            return Ok(false);
        }
        let request = LoadRequest::Payload {
            url: url.clone(),
            bytes: bytes.into(),
            layout: layout.clone(),
            colored: self.transfer_colored.take(),
        };
        self.task.interrupt();
        self.awaiting_transfer = false;
        self.start_task(request, scheduler)?;
        Ok(true)
    }

    /// Reload the recorded source, e.g. after the file changed on disk.
    ///
    /// Returns `Ok(false)` if nothing was ever loaded.
    ///
    /// # Errors
    ///
    /// See [`Self::load_data`].
    pub fn reload(&mut self, scheduler: &TaskScheduler) -> Result<bool, CloudError> {
        let Some(source) = self.source.take() else {
            return Ok(false);
        };
        log::debug!("[{}] reloading", self.name());
        if let SourceDescriptor::Random { count, colored } = source {
            // Same count would short-circuit the refill.
            self.clear();
            return Ok(self.random_fill(count, colored));
        }
        self.load_data(source, scheduler)
    }

    /// Empty the cloud, cancelling any in-flight load. Device buffers are
    /// kept for reuse.
    pub fn clear(&mut self) {
        self.task.interrupt();
        self.shared.host.lock().reset(false);
        self.optimized = false;
        self.optimized_count = 0;
        self.no_optimize = false;
        self.awaiting_transfer = false;
        self.transfer_colored = None;
        self.source = None;
        self.shared.progress.set(Progress::NEVER);
    }

    /// Move the data to device buffers and discard the host arrays.
    ///
    /// Refused (returns `false`) when device buffers are unavailable, the
    /// data was edited point by point, a load is in progress, or there is
    /// no recorded source to regenerate from.
    pub fn optimize(&mut self, device: &mut dyn DeviceBackend) -> bool {
        if self.optimized {
            return true;
        }
        if !self.device_buffers || self.no_optimize || self.loading() || self.source.is_none() {
            return false;
        }

        let mut host = self.shared.host.lock();
        let colors = host.colored.then_some(host.colors.as_slice());
        self.gpu.upload(device, &self.shared.name, &host.points, colors);
        self.optimized_count = host.points.len();
        host.discard();
        drop(host);
        self.optimized = true;
        log::debug!(
            "[{}] optimized ({} points on device)",
            self.shared.name,
            self.optimized_count
        );
        true
    }

    /// Submit a draw of the cloud. Skipped (returns `false`) while empty or
    /// loading.
    ///
    /// Device buffers created under an older context are rebuilt first:
    /// non-optimized clouds re-upload their host arrays, optimized clouds
    /// replay their source.
    pub fn draw(&mut self, device: &mut dyn DeviceBackend) -> bool {
        if self.loading() || self.size() == 0 {
            return false;
        }
        if !self.device_buffers {
            let host = self.shared.host.lock();
            device.submit(DrawCall {
                cloud: &self.shared.name,
                source: DrawSource::Host {
                    points: &host.points,
                    colors: host.colored.then_some(host.colors.as_slice()),
                },
                count: host.points.len() as u32,
                style: self.style,
            });
            return true;
        }

        if !self.gpu.is_current(device) {
            self.recover_context(device);
            if self.loading() || self.size() == 0 {
                return false;
            }
        }

        let count = if self.optimized {
            self.optimized_count
        } else {
            let mut host = self.shared.host.lock();
            if host.dirty {
                let colors = host.colored.then_some(host.colors.as_slice());
                self.gpu.upload(device, &self.shared.name, &host.points, colors);
                host.dirty = false;
            }
            host.points.len()
        };

        let Some(vertices) = self.gpu.vertices else {
            return false;
        };
        device.submit(DrawCall {
            cloud: &self.shared.name,
            source: DrawSource::Buffers {
                vertices,
                colors: self.gpu.colors,
            },
            count: count as u32,
            style: self.style,
        });
        true
    }

    /// Cancel any load and free device buffers.
    pub fn release(&mut self, device: &mut dyn DeviceBackend) {
        self.task.interrupt();
        self.gpu.release(device);
    }

    fn already_loaded(&self, source: &SourceDescriptor) -> bool {
        self.source.as_ref() == Some(source) && !self.shared.host.lock().load_failed
    }

    /// Refuse edits of optimized clouds and stop any load before editing.
    fn begin_edit(&self) -> Result<(), CloudError> {
        if self.optimized {
            return Err(CloudError::CannotMutateOptimizedCloud {
                name: self.shared.name.clone(),
            });
        }
        self.task.interrupt();
        Ok(())
    }

    /// Point-by-point edits detach the data from any source.
    fn mark_edited(&mut self) {
        self.no_optimize = true;
        self.source = None;
        self.awaiting_transfer = false;
        if self.loading() {
            self.shared.progress.set(Progress::DONE);
        }
    }

    /// Forget device-only data before new host data is produced.
    fn leave_optimized(&mut self) {
        if self.optimized {
            self.optimized = false;
            self.optimized_count = 0;
            self.shared.host.lock().reset(false);
        }
    }

    fn start_task(
        &mut self,
        request: LoadRequest,
        scheduler: &TaskScheduler,
    ) -> Result<(), CloudError> {
        *self.shared.request.lock() = Some(request);
        self.shared.progress.set(0.0);
        if let Err(e) = scheduler.start(&self.task) {
            self.source = None;
            self.shared.mark_failed();
            return Err(e);
        }
        Ok(())
    }

    /// Returns the coloredness actually used.
    fn fill_random(&mut self, count: usize, colored: bool) -> bool {
        let mut host = self.shared.host.lock();
        let len = host.points.len();
        if len == 0 {
            host.reset(colored);
        }
        let colored = host.colored;
        if count <= len {
            host.truncate(count);
            return colored;
        }

        let mut rng = rand::rng();
        let mut unit = || rng.random_range(0.0..=1.0_f32);
        for _ in len..count {
            let point = Vec3::new(unit(), unit(), unit());
            host.points.push(point);
            if colored {
                let color = Vec4::new(unit(), unit(), unit(), unit());
                host.colors.push(color);
            }
        }
        host.dirty = true;
        colored
    }

    /// The device buffers belong to a dead context.
    fn recover_context(&mut self, device: &mut dyn DeviceBackend) {
        log::debug!("[{}] context changed, rebuilding device buffers", self.shared.name);
        self.gpu.reallocate(device, &self.shared.name);
        if !self.optimized {
            self.shared.host.lock().dirty = true;
            return;
        }

        let count = self.optimized_count;
        let colored = self.shared.host.lock().colored;
        self.optimized = false;
        self.optimized_count = 0;
        match self.source.clone() {
            Some(SourceDescriptor::Random { count: n, colored }) => {
                let _ = self.fill_random(n, colored);
            }
            Some(SourceDescriptor::File { path, layout }) => {
                let request = LoadRequest::File {
                    path: self.loading.resolve(&path),
                    layout,
                    colored: Some(colored),
                };
                match loader::execute(&self.shared, &request, &|| false) {
                    Ok(LoadOutcome::Completed(n)) if n != count => log::warn!(
                        "[{}] regenerated {n} points, had {count}",
                        self.shared.name
                    ),
                    Ok(_) => {}
                    Err(e) => self.shared.fail(e),
                }
            }
            Some(SourceDescriptor::Network { .. }) => {
                self.awaiting_transfer = true;
                self.transfer_colored = Some(colored);
                self.shared.progress.set(0.0);
            }
            None => {}
        }
    }
}

impl Drop for CloudBuffer {
    fn drop(&mut self) {
        self.task.interrupt();
    }
}

impl std::fmt::Debug for CloudBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudBuffer")
            .field("name", &self.shared.name)
            .field("size", &self.size())
            .field("optimized", &self.optimized)
            .field("progress", &self.load_progress())
            .finish_non_exhaustive()
    }
}
