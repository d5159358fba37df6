//! State shared between a cloud and its load task.

use std::sync::atomic::{AtomicU32, Ordering};

use glam::{Vec3, Vec4};
use parking_lot::Mutex;

use super::loader::LoadRequest;
use crate::error::CloudError;

/// Color given to points of a colored cloud that arrive without one.
pub(crate) const DEFAULT_COLOR: Vec4 = Vec4::ONE;

/// Load progress stored as `f32` bits so readers never block on a writer.
///
/// `-1` means never loaded, `[0, 1)` loading, `1` complete.
pub(crate) struct Progress(AtomicU32);

impl Progress {
    pub(crate) const NEVER: f32 = -1.0;
    pub(crate) const DONE: f32 = 1.0;

    pub(crate) fn new() -> Self {
        Self(AtomicU32::new(Self::NEVER.to_bits()))
    }

    pub(crate) fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Release);
    }

    /// Whether a load has started and not yet completed.
    pub(crate) fn loading(&self) -> bool {
        let p = self.get();
        (0.0..Self::DONE).contains(&p)
    }
}

/// Host-resident point data.
#[derive(Default)]
pub(crate) struct HostData {
    pub(crate) points: Vec<Vec3>,
    /// Same length as `points` when `colored`, empty otherwise.
    pub(crate) colors: Vec<Vec4>,
    pub(crate) colored: bool,
    /// Host arrays changed since the last device upload.
    pub(crate) dirty: bool,
    pub(crate) last_error: Option<CloudError>,
    /// The last load of the recorded source failed.
    pub(crate) load_failed: bool,
}

impl HostData {
    /// Drop every point past `len`.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.points.truncate(len);
        self.colors.truncate(len);
        self.dirty = true;
    }

    /// Forget all points and the coloredness they established.
    pub(crate) fn reset(&mut self, colored: bool) {
        self.points.clear();
        self.colors.clear();
        self.colored = colored;
        self.dirty = true;
    }

    /// Release the host arrays' memory.
    pub(crate) fn discard(&mut self) {
        self.points = Vec::new();
        self.colors = Vec::new();
        self.dirty = false;
    }
}

/// Everything a load task touches. Device buffers are deliberately absent:
/// a task only ever writes host arrays and progress.
pub(crate) struct CloudShared {
    pub(crate) name: String,
    pub(crate) host: Mutex<HostData>,
    pub(crate) progress: Progress,
    /// What the next task execution loads.
    pub(crate) request: Mutex<Option<LoadRequest>>,
}

impl CloudShared {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            host: Mutex::new(HostData::default()),
            progress: Progress::new(),
            request: Mutex::new(None),
        }
    }

    /// Mark the last load as failed. Progress falls back to "complete" if
    /// older data is still present, else to "never loaded".
    pub(crate) fn mark_failed(&self) {
        self.finish_failed(None);
    }

    /// Mark the last load as failed and keep `error` for
    /// [`CloudBuffer::take_error`](super::CloudBuffer::take_error).
    pub(crate) fn fail(&self, error: CloudError) {
        self.finish_failed(Some(error));
    }

    /// The progress store comes last: once a watcher sees the load finish,
    /// the error is already in place.
    fn finish_failed(&self, error: Option<CloudError>) {
        let has_points = {
            let mut host = self.host.lock();
            host.load_failed = true;
            if error.is_some() {
                host.last_error = error;
            }
            !host.points.is_empty()
        };
        self.progress
            .set(if has_points { Progress::DONE } else { Progress::NEVER });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_states() {
        let progress = Progress::new();
        assert!(!progress.loading());
        progress.set(0.0);
        assert!(progress.loading());
        progress.set(0.75);
        assert!(progress.loading());
        progress.set(Progress::DONE);
        assert!(!progress.loading());
    }

    #[test]
    fn failure_keeps_existing_data_complete() {
        let shared = CloudShared::new("c");
        shared.host.lock().points.push(Vec3::ZERO);
        shared.progress.set(0.0);
        shared.fail(CloudError::SchedulerStopped);
        assert_eq!(shared.progress.get(), Progress::DONE);
        assert!(shared.host.lock().last_error.is_some());
    }

    #[test]
    fn error_is_stored_before_load_reads_finished() {
        for _ in 0..200 {
            let shared = std::sync::Arc::new(CloudShared::new("c"));
            shared.progress.set(0.0);
            let failing = {
                let shared = std::sync::Arc::clone(&shared);
                std::thread::spawn(move || shared.fail(CloudError::SchedulerStopped))
            };
            while shared.progress.loading() {
                std::hint::spin_loop();
            }
            assert!(shared.host.lock().last_error.is_some());
            failing.join().unwrap();
        }
    }

    #[test]
    fn failure_on_empty_cloud_reads_never_loaded() {
        let shared = CloudShared::new("c");
        shared.progress.set(0.0);
        shared.fail(CloudError::SchedulerStopped);
        assert_eq!(shared.progress.get(), Progress::NEVER);
    }
}
