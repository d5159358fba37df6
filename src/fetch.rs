//! Blocking HTTP transport for network sources.
//!
//! Stands in for an application's own network layer: downloads every
//! transfer a registry is waiting for and hands the bytes over.

use std::path::PathBuf;

use crate::error::CloudError;
use crate::gpu::DeviceBackend;
use crate::registry::CloudRegistry;

/// Download `url` completely.
///
/// # Errors
///
/// [`CloudError::SourceUnreadable`] carrying the URL if the request or the
/// body read fails.
pub fn download(url: &str) -> Result<Vec<u8>, CloudError> {
    let unreadable = |e: ureq::Error| CloudError::SourceUnreadable {
        path: PathBuf::from(url),
        source: std::io::Error::other(e),
    };
    log::info!("downloading {url}");
    let mut response = ureq::get(url).call().map_err(unreadable)?;
    response
        .body_mut()
        .with_config()
        .limit(u64::MAX)
        .read_to_vec()
        .map_err(unreadable)
}

/// Fetch every pending transfer of `registry`. Returns how many payloads
/// were delivered; failed downloads are logged and left pending.
pub fn fetch_pending<D: DeviceBackend>(registry: &mut CloudRegistry<D>) -> usize {
    let mut delivered = 0;
    for (name, url) in registry.pending_transfers() {
        let bytes = match download(&url) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("[{name}] {e}");
                continue;
            }
        };
        match registry.notify_transfer_complete(&name, bytes) {
            Ok(true) => delivered += 1,
            Ok(false) => {}
            Err(e) => log::warn!("[{name}] {e}"),
        }
    }
    delivered
}
