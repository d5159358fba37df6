//! `nuage` command-line tool: load a point cloud, optimize it, and check
//! that it survives a simulated context loss.

use std::time::Duration;

use nuage::gpu::HeadlessDevice;
use nuage::{CloudRegistry, ColumnMap, Options, RowLayout, SourceDescriptor};
use web_time::Instant;

const CLOUD: &str = "cloud";

struct Args {
    location: String,
    separator: String,
    columns: (usize, usize, usize),
}

fn parse_args() -> Result<Args, String> {
    let mut args = std::env::args().skip(1);
    let location = args
        .next()
        .ok_or("Usage: nuage <path-or-url> [separator] [x y z]")?;
    let separator = args.next().unwrap_or_else(|| ",".to_owned());
    let mut column = |default: usize| -> Result<usize, String> {
        args.next().map_or(Ok(default), |arg| {
            arg.parse()
                .map_err(|e| format!("invalid column index {arg:?}: {e}"))
        })
    };
    let columns = (column(1)?, column(2)?, column(3)?);
    Ok(Args {
        location,
        separator,
        columns,
    })
}

fn wait_for_load(registry: &CloudRegistry<HeadlessDevice>) {
    let mut last_report = Instant::now();
    while registry.cloud(CLOUD).is_some_and(nuage::CloudBuffer::loading) {
        if last_report.elapsed() > Duration::from_millis(250) {
            log::info!("loading: {:.0}%", registry.load_progress(CLOUD) * 100.0);
            last_report = Instant::now();
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

fn run(args: Args) -> Result<(), String> {
    let mut registry = CloudRegistry::new(HeadlessDevice::new(), Options::default());
    let (x, y, z) = args.columns;
    let layout = RowLayout::new(args.separator, ColumnMap::xyz(x, y, z));
    let source = SourceDescriptor::from_location(&args.location, layout);

    let _ = registry.load_data(CLOUD, source).map_err(|e| e.to_string())?;
    let _ = nuage::fetch::fetch_pending(&mut registry);
    if !registry.pending_transfers().is_empty() {
        return Err(format!("could not fetch {}", args.location));
    }
    wait_for_load(&registry);
    if let Some(e) = registry.take_error(CLOUD) {
        return Err(e.to_string());
    }

    let loaded = registry.size(CLOUD);
    log::info!("{loaded} points loaded from {}", args.location);
    if !registry.optimize(CLOUD) {
        return Err("cloud could not be optimized".to_owned());
    }

    registry.device_mut().invalidate_context();
    let _ = registry.draw(CLOUD);
    // Network clouds wait for their bytes again.
    let _ = nuage::fetch::fetch_pending(&mut registry);
    wait_for_load(&registry);
    let _ = registry.draw(CLOUD);
    log::info!(
        "after context loss: {} points, {} draw(s) submitted",
        registry.size(CLOUD),
        registry.device().draws().len()
    );
    Ok(())
}

fn main() {
    env_logger::init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            log::error!("{e}");
            std::process::exit(2);
        }
    };

    if let Err(e) = run(args) {
        log::error!("{e}");
        std::process::exit(1);
    }
}
