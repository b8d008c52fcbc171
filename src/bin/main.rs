use std::{
    error::Error,
    io::{self, IsTerminal},
    process,
    sync::{Arc, Mutex, PoisonError},
};

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use sysvc::{
    ServiceConfig,
    cli::{Cli, parse_args},
    config::{ServiceManifest, load_manifest},
    error::WatchError,
    run_service,
    watch::{FsWatcher, watch_all},
};

const DEFAULT_NAME: &str = "ExampleServ";

fn main() {
    let args = parse_args();
    init_logging(&args);

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(err) => {
            error!("failed to build service configuration: {err}");
            process::exit(2);
        }
    };

    process::exit(run_service(config, &args.flags));
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .try_init();
}

fn build_config(args: &Cli) -> Result<ServiceConfig, Box<dyn Error>> {
    let manifest = match &args.config {
        Some(path) => load_manifest(path)?,
        None => ServiceManifest {
            name: DEFAULT_NAME.into(),
            display_name: Some("Example Service".into()),
            description: Some("Example service hosted by sysvc".into()),
            ..ServiceManifest::default()
        },
    };

    let watcher: Arc<Mutex<Option<FsWatcher>>> = Arc::default();
    let watched = manifest.watch.clone();
    let starting = Arc::clone(&watcher);
    let stopping = Arc::clone(&watcher);

    let config = ServiceConfig::from_manifest(&manifest)
        .on_start(move || {
            info!("on_start called");
            if watched.is_empty() {
                return Ok(());
            }

            let mut fs_watcher = match FsWatcher::new(|event| info!("{event}")) {
                Ok(fs_watcher) => fs_watcher,
                Err(WatchError::Unsupported) => {
                    warn!("ignoring watch list: {}", WatchError::Unsupported);
                    return Ok(());
                }
                Err(err) => return Err(err.into()),
            };
            let ids = watch_all(&mut fs_watcher, watched.iter().map(|path| path.as_path()));
            info!("watching {} of {} directories", ids.len(), watched.len());
            *starting.lock().unwrap_or_else(PoisonError::into_inner) = Some(fs_watcher);
            Ok(())
        })
        .on_stop(move || {
            info!("on_stop called");
            let fs_watcher = stopping.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(mut fs_watcher) = fs_watcher
                && let Err(err) = fs_watcher.stop_all_watch()
            {
                warn!("{err}");
            }
            Ok(())
        })
        .on_signal(|| {
            info!("on_signal called, reloading configuration");
            Ok(())
        })
        .build()?;

    Ok(config)
}
