//! Name-keyed cache of clouds.
//!
//! [`CloudRegistry`] owns every [`CloudBuffer`], the [`TaskScheduler`] that
//! loads them and the [`DeviceBackend`] they draw through. It is the entry
//! point for scripting front ends, the file watcher and the network
//! transport. All methods take the registry by reference on the owner
//! thread; exclusive borrows stand in for a registry-wide lock.

use std::ops::BitOr;
use std::sync::Arc;

use glam::{Vec3, Vec4};
use rustc_hash::FxHashMap;

use crate::cloud::CloudBuffer;
use crate::error::CloudError;
use crate::gpu::{DeviceBackend, PointStyle};
use crate::options::Options;
use crate::source::SourceDescriptor;
use crate::task::TaskScheduler;

/// Lookup flags for [`CloudRegistry::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LookupMode(u8);

impl LookupMode {
    /// Only return an existing cloud.
    pub const DEFAULT: Self = Self(0);
    /// Create the cloud if absent.
    pub const CREATE: Self = Self(1);
    /// Replace an optimized cloud with a fresh, empty one.
    pub const CLEAR_OPTIMIZED: Self = Self(1 << 1);

    /// Whether every flag of `other` is set.
    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for LookupMode {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Owner of all clouds, their loader pool and their device backend.
pub struct CloudRegistry<D: DeviceBackend> {
    clouds: FxHashMap<String, CloudBuffer>,
    scheduler: TaskScheduler,
    device: D,
    options: Options,
}

impl<D: DeviceBackend> CloudRegistry<D> {
    /// Empty registry drawing through `device`.
    #[must_use]
    pub fn new(device: D, options: Options) -> Self {
        log::debug!(
            "cloud registry: {} loader thread(s), device buffers {}",
            options.scheduler.worker_limit(),
            if options.device.buffers_available {
                "enabled"
            } else {
                "disabled"
            }
        );
        Self {
            clouds: FxHashMap::default(),
            scheduler: TaskScheduler::new(&options.scheduler),
            device,
            options,
        }
    }

    /// Look up `name` according to `mode`.
    ///
    /// Returns `None` if the cloud is absent and [`LookupMode::CREATE`] is
    /// not set.
    pub fn resolve(&mut self, name: &str, mode: LookupMode) -> Option<&mut CloudBuffer> {
        resolve_in(&mut self.clouds, &mut self.device, &self.options, name, mode)
    }

    /// Existing cloud, if any.
    #[must_use]
    pub fn cloud(&self, name: &str) -> Option<&CloudBuffer> {
        self.clouds.get(name)
    }

    /// Names of all clouds, in no particular order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.clouds.keys().map(String::as_str)
    }

    /// Number of clouds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clouds.len()
    }

    /// Whether the registry holds no cloud.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clouds.is_empty()
    }

    /// Destroy `name`, waiting for its load to stop first. Returns whether
    /// it existed.
    pub fn drop_cloud(&mut self, name: &str) -> bool {
        let Some(mut cloud) = self.clouds.remove(name) else {
            return false;
        };
        cloud.release(&mut self.device);
        log::debug!("[{name}] dropped");
        true
    }

    /// Destroy every cloud except `name` (all of them if `name` is empty).
    pub fn keep_only(&mut self, name: &str) {
        let device = &mut self.device;
        self.clouds.retain(|key, cloud| {
            if key == name {
                return true;
            }
            cloud.release(device);
            log::debug!("[{key}] dropped");
            false
        });
    }

    /// See [`CloudBuffer::random_fill`]. Creates the cloud if absent.
    pub fn random_fill(&mut self, name: &str, count: usize, colored: bool) -> bool {
        self.resolve(name, LookupMode::CREATE)
            .is_some_and(|cloud| cloud.random_fill(count, colored))
    }

    /// See [`CloudBuffer::add_point`]. Creates the cloud if absent.
    ///
    /// Front ends that want an optimized cloud to be recreated instead of
    /// refused resolve it with [`LookupMode::CLEAR_OPTIMIZED`] first.
    ///
    /// # Errors
    ///
    /// [`CloudError::CannotMutateOptimizedCloud`] if the cloud is optimized.
    pub fn add_point(
        &mut self,
        name: &str,
        point: Vec3,
        color: Option<Vec4>,
    ) -> Result<bool, CloudError> {
        match self.resolve(name, LookupMode::CREATE) {
            Some(cloud) => cloud.add_point(point, color),
            None => Ok(false),
        }
    }

    /// See [`CloudBuffer::remove_points`]. Absent clouds are left absent.
    ///
    /// # Errors
    ///
    /// [`CloudError::CannotMutateOptimizedCloud`] if the cloud is optimized.
    pub fn remove_points(&mut self, name: &str, count: usize) -> Result<bool, CloudError> {
        match self.clouds.get_mut(name) {
            Some(cloud) => cloud.remove_points(count),
            None => Ok(false),
        }
    }

    /// Load `source` into `name` in the background. Creates the cloud if
    /// absent.
    ///
    /// # Errors
    ///
    /// See [`CloudBuffer::load_data`].
    pub fn load_data(
        &mut self,
        name: &str,
        source: SourceDescriptor,
    ) -> Result<bool, CloudError> {
        let Some(cloud) =
            resolve_in(&mut self.clouds, &mut self.device, &self.options, name, LookupMode::CREATE)
        else {
            return Ok(false);
        };
        cloud.load_data(source, &self.scheduler)
    }

    /// Load progress in `[0, 1]`; absent or never-loaded clouds read 0.
    #[must_use]
    pub fn load_progress(&self, name: &str) -> f32 {
        self.clouds
            .get(name)
            .map_or(0.0, |cloud| cloud.load_progress().max(0.0))
    }

    /// Draw `name` if it exists and has data.
    pub fn draw(&mut self, name: &str) -> bool {
        match self.clouds.get_mut(name) {
            Some(cloud) => cloud.draw(&mut self.device),
            None => false,
        }
    }

    /// Draw every cloud; returns how many were submitted.
    pub fn draw_all(&mut self) -> usize {
        let device = &mut self.device;
        self.clouds
            .values_mut()
            .filter_map(|cloud| cloud.draw(device).then_some(()))
            .count()
    }

    /// See [`CloudBuffer::optimize`].
    pub fn optimize(&mut self, name: &str) -> bool {
        match self.clouds.get_mut(name) {
            Some(cloud) => cloud.optimize(&mut self.device),
            None => false,
        }
    }

    /// Empty `name`. Returns whether it existed.
    pub fn clear(&mut self, name: &str) -> bool {
        self.clouds.get_mut(name).map(CloudBuffer::clear).is_some()
    }

    /// Point count of `name` (0 if absent).
    #[must_use]
    pub fn size(&self, name: &str) -> usize {
        self.clouds.get(name).map_or(0, CloudBuffer::size)
    }

    /// Whether `name` exists and is optimized.
    #[must_use]
    pub fn is_optimized(&self, name: &str) -> bool {
        self.clouds.get(name).is_some_and(CloudBuffer::is_optimized)
    }

    /// The source of `name` changed: reload it in the background.
    ///
    /// # Errors
    ///
    /// See [`CloudBuffer::load_data`].
    pub fn notify_source_changed(&mut self, name: &str) -> Result<bool, CloudError> {
        match self.clouds.get_mut(name) {
            Some(cloud) => cloud.reload(&self.scheduler),
            None => Ok(false),
        }
    }

    /// The network transport finished fetching the source of `name`.
    ///
    /// # Errors
    ///
    /// A scheduler error if the load task could not be started.
    pub fn notify_transfer_complete(
        &mut self,
        name: &str,
        bytes: impl Into<Arc<[u8]>>,
    ) -> Result<bool, CloudError> {
        match self.clouds.get_mut(name) {
            Some(cloud) => cloud.notify_transfer_complete(bytes, &self.scheduler),
            None => Ok(false),
        }
    }

    /// `(cloud, url)` pairs the network transport still has to fetch.
    #[must_use]
    pub fn pending_transfers(&self) -> Vec<(String, String)> {
        self.clouds
            .iter()
            .filter_map(|(name, cloud)| {
                cloud
                    .pending_transfer()
                    .map(|url| (name.clone(), url.to_owned()))
            })
            .collect()
    }

    /// Set the rendering attributes of `name`. Returns whether it exists.
    pub fn set_point_style(&mut self, name: &str, style: PointStyle) -> bool {
        self.clouds
            .get_mut(name)
            .map(|cloud| cloud.set_style(style))
            .is_some()
    }

    /// Retrieve and clear the last error recorded on `name`.
    pub fn take_error(&self, name: &str) -> Option<CloudError> {
        self.clouds.get(name).and_then(CloudBuffer::take_error)
    }

    /// Device backend.
    #[must_use]
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Mutable device backend, e.g. to swap its context.
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Loader pool.
    #[must_use]
    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    /// Options the registry was created with.
    #[must_use]
    pub fn options(&self) -> &Options {
        &self.options
    }
}

impl<D: DeviceBackend> Drop for CloudRegistry<D> {
    fn drop(&mut self) {
        self.keep_only("");
        self.scheduler.stop_all();
    }
}

impl<D: DeviceBackend> std::fmt::Debug for CloudRegistry<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudRegistry")
            .field("clouds", &self.clouds.len())
            .field("workers", &self.scheduler.worker_count())
            .finish_non_exhaustive()
    }
}

/// Field-level lookup so callers can keep borrowing the scheduler.
fn resolve_in<'a, D: DeviceBackend>(
    clouds: &'a mut FxHashMap<String, CloudBuffer>,
    device: &mut D,
    options: &Options,
    name: &str,
    mode: LookupMode,
) -> Option<&'a mut CloudBuffer> {
    if mode.contains(LookupMode::CLEAR_OPTIMIZED)
        && clouds.get(name).is_some_and(CloudBuffer::is_optimized)
    {
        if let Some(mut stale) = clouds.remove(name) {
            stale.release(device);
        }
        log::debug!("[{name}] optimized cloud replaced");
    }
    if !clouds.contains_key(name) {
        if !mode.contains(LookupMode::CREATE) {
            return None;
        }
        log::debug!("[{name}] created");
        drop(clouds.insert(
            name.to_owned(),
            CloudBuffer::new(
                name,
                options.device.buffers_available,
                options.loading.clone(),
            ),
        ));
    }
    clouds.get_mut(name)
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use super::*;
    use crate::gpu::HeadlessDevice;
    use crate::options::DeviceOptions;
    use crate::source::{ColumnMap, RowLayout};

    fn registry() -> CloudRegistry<HeadlessDevice> {
        CloudRegistry::new(HeadlessDevice::new(), Options::default())
    }

    fn csv_file(rows: usize) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for i in 0..rows {
            writeln!(file, "{i},{i},{i}").unwrap();
        }
        file.flush().unwrap();
        file
    }

    fn csv(path: &std::path::Path) -> SourceDescriptor {
        SourceDescriptor::File {
            path: path.to_path_buf(),
            layout: RowLayout::new(",", ColumnMap::xyz(1, 2, 3)),
        }
    }

    fn wait_loaded(reg: &CloudRegistry<HeadlessDevice>, name: &str) {
        for _ in 0..5000 {
            if reg.cloud(name).is_some_and(|c| !c.loading()) {
                return;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("load did not finish");
    }

    #[test]
    fn lookup_flags_combine() {
        let mode = LookupMode::CREATE | LookupMode::CLEAR_OPTIMIZED;
        assert!(mode.contains(LookupMode::CREATE));
        assert!(mode.contains(LookupMode::CLEAR_OPTIMIZED));
        assert!(!LookupMode::CREATE.contains(LookupMode::CLEAR_OPTIMIZED));
        assert!(LookupMode::CREATE.contains(LookupMode::DEFAULT));
    }

    #[test]
    fn resolve_creates_only_on_request() {
        let mut reg = registry();
        assert!(reg.resolve("a", LookupMode::DEFAULT).is_none());
        assert!(reg.resolve("a", LookupMode::CREATE).is_some());
        assert!(reg.resolve("a", LookupMode::DEFAULT).is_some());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn optimize_then_clear_scenario() {
        let mut reg = registry();
        assert!(reg.random_fill("C", 1000, false));
        assert_eq!(reg.size("C"), 1000);
        assert!(reg.optimize("C"));
        assert!(matches!(
            reg.add_point("C", Vec3::ZERO, None),
            Err(CloudError::CannotMutateOptimizedCloud { .. })
        ));
        assert_eq!(reg.size("C"), 1000);
        assert!(reg.clear("C"));
        assert_eq!(reg.size("C"), 0);
        assert!(!reg.is_optimized("C"));
    }

    #[test]
    fn clear_optimized_lookup_recreates_cloud() {
        let mut reg = registry();
        assert!(reg.random_fill("C", 10, false));
        assert!(reg.optimize("C"));
        let buffers = reg.device().live_buffers();
        assert_eq!(buffers, 1);

        let cloud = reg
            .resolve("C", LookupMode::CREATE | LookupMode::CLEAR_OPTIMIZED)
            .unwrap();
        assert!(!cloud.is_optimized());
        assert_eq!(cloud.size(), 0);
        assert_eq!(reg.device().live_buffers(), 0);
        assert!(reg.add_point("C", Vec3::ONE, None).unwrap());
    }

    #[test]
    fn random_fill_twice_reports_unchanged() {
        let mut reg = registry();
        assert!(reg.random_fill("r", 64, true));
        assert!(!reg.random_fill("r", 64, true));
        assert_eq!(reg.size("r"), 64);
    }

    #[test]
    fn drop_during_load_interrupts_and_frees() {
        let file = csv_file(100_000);
        let mut reg = registry();
        assert!(reg.load_data("C", csv(file.path())).unwrap());
        assert!(reg.drop_cloud("C"));
        assert!(reg.cloud("C").is_none());
        assert_eq!(reg.scheduler().pending_len(), 0);
        assert!(reg.scheduler().worker_count() <= 1);
        assert!(!reg.drop_cloud("C"));
        reg.scheduler().stop_all();
        assert_eq!(reg.scheduler().worker_count(), 0);
    }

    #[test]
    fn keep_only_drops_the_rest() {
        let mut reg = registry();
        for name in ["a", "b", "c"] {
            assert!(reg.random_fill(name, 4, false));
            assert!(reg.draw(name));
        }
        assert_eq!(reg.device().live_buffers(), 3);
        reg.keep_only("b");
        assert_eq!(reg.names().collect::<Vec<_>>(), vec!["b"]);
        assert_eq!(reg.device().live_buffers(), 1);
        reg.keep_only("");
        assert!(reg.is_empty());
    }

    #[test]
    fn progress_of_unknown_cloud_is_zero() {
        let mut reg = registry();
        assert_eq!(reg.load_progress("nothing"), 0.0);
        let _ = reg.resolve("fresh", LookupMode::CREATE);
        assert_eq!(reg.load_progress("fresh"), 0.0);
    }

    #[test]
    fn async_load_completes_and_draws() {
        let file = csv_file(500);
        let mut reg = registry();
        assert!(reg.load_data("pts", csv(file.path())).unwrap());
        assert!(!reg.load_data("pts", csv(file.path())).unwrap());
        wait_loaded(&reg, "pts");
        assert_eq!(reg.load_progress("pts"), 1.0);
        assert_eq!(reg.size("pts"), 500);

        assert!(reg.draw("pts"));
        let uploads = reg.device().upload_count();
        assert!(reg.draw("pts"));
        assert_eq!(reg.device().upload_count(), uploads);
    }

    #[test]
    fn relative_paths_use_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pts.csv"), "1,2,3\n").unwrap();
        let mut options = Options::default();
        options.loading.base_dir = Some(dir.path().to_path_buf());
        let mut reg = CloudRegistry::new(HeadlessDevice::new(), options);

        assert!(reg.load_data("rel", csv(std::path::Path::new("pts.csv"))).unwrap());
        wait_loaded(&reg, "rel");
        assert_eq!(reg.size("rel"), 1);
        assert!(reg.take_error("rel").is_none());
    }

    #[test]
    fn source_change_triggers_reload() {
        let file = csv_file(2);
        let mut reg = registry();
        assert!(reg.load_data("w", csv(file.path())).unwrap());
        wait_loaded(&reg, "w");
        std::fs::write(file.path(), "1,1,1\n2,2,2\n3,3,3\n4,4,4\n").unwrap();

        assert!(reg.notify_source_changed("w").unwrap());
        wait_loaded(&reg, "w");
        assert_eq!(reg.size("w"), 4);
        assert!(!reg.notify_source_changed("unknown").unwrap());
    }

    #[test]
    fn network_transfers_are_listed_until_delivered() {
        let mut reg = registry();
        let source = SourceDescriptor::from_location(
            "https://example.invalid/cloud.txt",
            RowLayout::new(" ", ColumnMap::xyz(1, 2, 3)),
        );
        assert!(reg.load_data("net", source).unwrap());
        assert_eq!(
            reg.pending_transfers(),
            vec![(
                "net".to_owned(),
                "https://example.invalid/cloud.txt".to_owned()
            )]
        );
        assert!(reg
            .notify_transfer_complete("net", b"0 0 0\n1 1 1\n2 2 2\n".to_vec())
            .unwrap());
        assert!(reg.pending_transfers().is_empty());
        wait_loaded(&reg, "net");
        assert_eq!(reg.size("net"), 3);
    }

    #[test]
    fn optimized_clouds_survive_context_loss() {
        let file = csv_file(120);
        let mut reg = registry();
        assert!(reg.load_data("file", csv(file.path())).unwrap());
        assert!(reg.random_fill("rnd", 77, true));
        wait_loaded(&reg, "file");
        assert!(reg.optimize("file"));
        assert!(reg.optimize("rnd"));

        reg.device_mut().invalidate_context();
        assert_eq!(reg.draw_all(), 2);
        assert_eq!(reg.size("file"), 120);
        assert_eq!(reg.size("rnd"), 77);
        let mut counts: Vec<u32> = reg.device().draws().iter().map(|d| d.count).collect();
        counts.sort_unstable();
        assert_eq!(counts, vec![77, 120]);
    }

    #[test]
    fn host_only_mode_never_optimizes() {
        let options = Options {
            device: DeviceOptions {
                buffers_available: false,
            },
            ..Options::default()
        };
        let mut reg = CloudRegistry::new(HeadlessDevice::new(), options);
        assert!(reg.random_fill("h", 16, false));
        assert!(!reg.optimize("h"));
        assert!(reg.draw("h"));
        assert_eq!(reg.device().live_buffers(), 0);
    }

    #[test]
    fn style_and_errors_need_existing_cloud() {
        let mut reg = registry();
        let style = PointStyle {
            size: Some(2.0),
            ..PointStyle::default()
        };
        assert!(!reg.set_point_style("none", style));
        assert!(reg.take_error("none").is_none());
        assert!(reg.random_fill("s", 3, false));
        assert!(reg.set_point_style("s", style));
        assert!(reg.draw("s"));
        assert_eq!(reg.device().draws()[0].style, style);
    }
}
