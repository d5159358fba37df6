//! Row-by-row loading of text sources into a cloud's host arrays.
//!
//! Runs on a scheduler worker for asynchronous loads and on the owner
//! thread for synchronous ones and for regeneration after a context change.

use std::fs::File;
use std::io::{BufRead, BufReader, Cursor};
use std::path::PathBuf;
use std::sync::Arc;

use glam::{Vec3, Vec4};
use web_time::Instant;

use super::host::{CloudShared, Progress, DEFAULT_COLOR};
use crate::error::CloudError;
use crate::source::RowLayout;

/// Rows parsed between two updates of the shared host arrays.
const BATCH_ROWS: usize = 1024;
/// Lines consumed between two progress updates, accepted or not.
const PROGRESS_LINES: usize = 256;

/// Resolved input of one load.
///
/// `colored` forces the coloredness of the result; `None` keeps the
/// cloud's current coloredness, or takes the layout's for an empty cloud.
#[derive(Debug, Clone)]
pub(crate) enum LoadRequest {
    /// Local file, path already resolved.
    File {
        path: PathBuf,
        layout: RowLayout,
        colored: Option<bool>,
    },
    /// Bytes delivered by the network collaborator.
    Payload {
        url: String,
        bytes: Arc<[u8]>,
        layout: RowLayout,
        colored: Option<bool>,
    },
}

impl LoadRequest {
    const fn forced_colored(&self) -> Option<bool> {
        match self {
            Self::File { colored, .. } | Self::Payload { colored, .. } => *colored,
        }
    }
}

/// How a load ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoadOutcome {
    /// All rows consumed; carries the accepted point count.
    Completed(usize),
    /// Stopped early on request.
    Interrupted,
}

/// Run `request` against `shared`. On failure progress is left as is;
/// the caller records the failure with [`CloudShared::fail`] or
/// [`CloudShared::mark_failed`].
pub(crate) fn execute(
    shared: &CloudShared,
    request: &LoadRequest,
    interrupted: &dyn Fn() -> bool,
) -> Result<LoadOutcome, CloudError> {
    let start = Instant::now();
    let outcome = load(shared, request, interrupted)
        .inspect_err(|e| log::warn!("[{}] load failed: {e}", shared.name))?;
    match outcome {
        LoadOutcome::Completed(count) => log::info!(
            "[{}] loaded {count} points in {:.1?}",
            shared.name,
            start.elapsed()
        ),
        LoadOutcome::Interrupted => {
            log::debug!("[{}] load interrupted", shared.name);
        }
    }
    Ok(outcome)
}

fn open(request: &LoadRequest) -> Result<(Box<dyn BufRead + '_>, u64, &RowLayout), CloudError> {
    match request {
        LoadRequest::File { path, layout, .. } => {
            let unreadable = |source| CloudError::SourceUnreadable {
                path: path.clone(),
                source,
            };
            let file = File::open(path).map_err(unreadable)?;
            let total = file.metadata().map_or(0, |m| m.len());
            Ok((Box::new(BufReader::new(file)), total, layout))
        }
        LoadRequest::Payload { bytes, layout, .. } => Ok((
            Box::new(Cursor::new(&bytes[..])),
            bytes.len() as u64,
            layout,
        )),
    }
}

fn load(
    shared: &CloudShared,
    request: &LoadRequest,
    interrupted: &dyn Fn() -> bool,
) -> Result<LoadOutcome, CloudError> {
    let (mut reader, total, layout) = open(request)?;

    let colored = {
        let mut host = shared.host.lock();
        let colored = match request.forced_colored() {
            Some(colored) => colored,
            None if host.points.is_empty() => layout.is_colored(),
            None => host.colored,
        };
        host.reset(colored);
        host.load_failed = false;
        colored
    };
    shared.progress.set(0.0);

    let mut line = Vec::new();
    let mut consumed = 0u64;
    let mut points: Vec<Vec3> = Vec::with_capacity(BATCH_ROWS);
    let mut colors: Vec<Vec4> = Vec::with_capacity(BATCH_ROWS);
    let mut count = 0usize;
    let mut lines = 0usize;

    loop {
        if interrupted() {
            return Ok(LoadOutcome::Interrupted);
        }
        line.clear();
        let read = reader.read_until(b'\n', &mut line).map_err(|source| {
            CloudError::SourceUnreadable {
                path: source_path(request),
                source,
            }
        })?;
        if read == 0 {
            break;
        }
        consumed += read as u64;
        lines += 1;

        let text = String::from_utf8_lossy(&line);
        if let Some(row) = layout.parse(text.trim_end_matches(['\r', '\n'])) {
            points.push(row.position);
            if colored {
                colors.push(row.color.unwrap_or(DEFAULT_COLOR));
            }
        }

        if points.len() >= BATCH_ROWS {
            count += flush(shared, &mut points, &mut colors);
        }
        if lines.is_multiple_of(PROGRESS_LINES) && total > 0 {
            // Never report completion before the final store below.
            let fraction = (consumed as f64 / total as f64) as f32;
            shared.progress.set(fraction.min(0.999));
        }
    }

    count += flush(shared, &mut points, &mut colors);
    shared.host.lock().dirty = true;
    shared.progress.set(Progress::DONE);
    Ok(LoadOutcome::Completed(count))
}

fn flush(shared: &CloudShared, points: &mut Vec<Vec3>, colors: &mut Vec<Vec4>) -> usize {
    let n = points.len();
    let mut host = shared.host.lock();
    host.points.append(points);
    host.colors.append(colors);
    host.dirty = true;
    n
}

fn source_path(request: &LoadRequest) -> PathBuf {
    match request {
        LoadRequest::File { path, .. } => path.clone(),
        LoadRequest::Payload { url, .. } => PathBuf::from(url),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::source::{ChannelSource, ColumnMap};

    fn write_source(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn file_request(file: &tempfile::NamedTempFile, layout: RowLayout) -> LoadRequest {
        LoadRequest::File {
            path: file.path().to_path_buf(),
            layout,
            colored: None,
        }
    }

    fn never() -> bool {
        false
    }

    #[test]
    fn skips_malformed_rows() {
        let file = write_source("1,2,3\nbad,row,here\n4,5\n7,8,9\r\n");
        let shared = CloudShared::new("c");
        let request = file_request(&file, RowLayout::new(",", ColumnMap::xyz(1, 2, 3)));

        let outcome = execute(&shared, &request, &never).unwrap();
        assert_eq!(outcome, LoadOutcome::Completed(2));
        let host = shared.host.lock();
        assert_eq!(host.points, vec![Vec3::new(1.0, 2.0, 3.0), Vec3::new(7.0, 8.0, 9.0)]);
        assert!(host.colors.is_empty());
        assert!(host.dirty);
        assert_eq!(shared.progress.get(), Progress::DONE);
    }

    #[test]
    fn bad_colors_get_default_color() {
        let file = write_source("0 0 0 255\n1 1 1 oops\n");
        let map = ColumnMap::xyz(1, 2, 3).with_rgba(
            ChannelSource::Column(4),
            ChannelSource::Constant(0.0),
            ChannelSource::Constant(0.0),
            ChannelSource::Constant(1.0),
        );
        let layout = RowLayout::new(" ", map).with_color_scale(1.0 / 255.0);
        let shared = CloudShared::new("c");

        let _ = execute(&shared, &file_request(&file, layout), &never).unwrap();
        let host = shared.host.lock();
        assert!(host.colored);
        assert_eq!(host.colors.len(), 2);
        assert_eq!(host.colors[1], DEFAULT_COLOR);
    }

    #[test]
    fn replaces_previous_points_and_keeps_coloredness() {
        let file = write_source("5,5,5\n");
        let shared = CloudShared::new("c");
        {
            let mut host = shared.host.lock();
            host.points = vec![Vec3::ZERO; 3];
            host.colors = vec![Vec4::ONE; 3];
            host.colored = true;
        }
        let request = file_request(&file, RowLayout::new(",", ColumnMap::xyz(1, 2, 3)));
        let _ = execute(&shared, &request, &never).unwrap();
        let host = shared.host.lock();
        assert_eq!(host.points.len(), 1);
        assert_eq!(host.colors, vec![DEFAULT_COLOR]);
    }

    #[test]
    fn missing_file_leaves_progress_to_caller() {
        let shared = CloudShared::new("c");
        shared.progress.set(0.0);
        let request = LoadRequest::File {
            path: PathBuf::from("/definitely/not/here.csv"),
            layout: RowLayout::new(",", ColumnMap::xyz(1, 2, 3)),
            colored: None,
        };
        let err = execute(&shared, &request, &never).unwrap_err();
        assert!(matches!(
            err,
            CloudError::SourceUnreadable { ref path, .. }
                if path == &PathBuf::from("/definitely/not/here.csv")
        ));
        assert!(shared.progress.loading());

        shared.fail(err);
        assert!(shared.host.lock().load_failed);
        assert_eq!(shared.progress.get(), Progress::NEVER);
    }

    #[test]
    fn forced_coloredness_wins_over_layout() {
        let file = write_source("1 2 3 255\n");
        let map = ColumnMap::xyz(1, 2, 3).with_rgba(
            ChannelSource::Column(4),
            ChannelSource::Constant(0.0),
            ChannelSource::Constant(0.0),
            ChannelSource::Constant(1.0),
        );
        let layout = RowLayout::new(" ", map).with_color_scale(1.0 / 255.0);
        let shared = CloudShared::new("c");
        let request = LoadRequest::File {
            path: file.path().to_path_buf(),
            layout,
            colored: Some(false),
        };

        let _ = execute(&shared, &request, &never).unwrap();
        let host = shared.host.lock();
        assert!(!host.colored);
        assert_eq!(host.points.len(), 1);
        assert!(host.colors.is_empty());
    }

    #[test]
    fn skipped_rows_still_advance_progress() {
        let mut contents = "not,a,point\n".repeat(4 * PROGRESS_LINES);
        contents.push_str("1,2,3\n");
        let file = write_source(&contents);
        let shared = CloudShared::new("c");
        let request = file_request(&file, RowLayout::new(",", ColumnMap::xyz(1, 2, 3)));

        let seen = std::cell::Cell::new(0.0_f32);
        let watch = || {
            seen.set(seen.get().max(shared.progress.get()));
            false
        };
        assert_eq!(
            execute(&shared, &request, &watch).unwrap(),
            LoadOutcome::Completed(1)
        );
        assert!(seen.get() > 0.5 && seen.get() < Progress::DONE);
    }

    #[test]
    fn payload_loads_like_a_file() {
        let shared = CloudShared::new("net");
        let request = LoadRequest::Payload {
            url: "http://host/p.csv".to_owned(),
            bytes: Arc::from(&b"1;2;3\n4;5;6"[..]),
            layout: RowLayout::new(";", ColumnMap::xyz(1, 2, 3)),
            colored: None,
        };
        assert_eq!(
            execute(&shared, &request, &never).unwrap(),
            LoadOutcome::Completed(2)
        );
    }

    #[test]
    fn interruption_stops_before_completion() {
        let file = write_source("1,2,3\n4,5,6\n");
        let shared = CloudShared::new("c");
        let request = file_request(&file, RowLayout::new(",", ColumnMap::xyz(1, 2, 3)));
        let outcome = execute(&shared, &request, &|| true).unwrap();
        assert_eq!(outcome, LoadOutcome::Interrupted);
        assert!(shared.progress.get() < Progress::DONE);
    }
}
