mod config;
mod external;
mod watch;

use std::sync::Arc;
use std::time::Duration;

use config::{config_path_from_env, indexer_options, load_or_create_config, resolve_path};
use external::{DeezerArtistImages, HttpProbe};
use library::{resolve_root_dirs, CatalogDb, Indexer};
use reqwest::Client;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use watch::start_watcher;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = config_path_from_env();
    let (config, created) = load_or_create_config(&config_path)?;
    if created {
        info!("Created default config at {:?}", config_path);
    } else {
        info!("Loaded config from {:?}", config_path);
    }

    let index_path = resolve_path(&config_path, &config.index_path);
    if let Some(parent) = index_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let db = CatalogDb::open(&index_path)?;
    let options = indexer_options(&config_path, &config);

    let client = Client::builder().user_agent(config.user_agent.as_str()).build()?;
    let handle = Handle::current();
    let probe = HttpProbe::new(
        client.clone(),
        config.connectivity_url.clone(),
        Duration::from_secs(config.connectivity_timeout_secs),
        handle.clone(),
    );
    let images = DeezerArtistImages::new(
        client,
        Duration::from_secs(config.artist_image_timeout_secs),
        handle,
    );

    let roots = resolve_root_dirs(&options.root_dirs, options.home_dir.as_deref());
    let scan_interval = options.scan_interval;
    let indexer = Arc::new(
        Indexer::new(db, options)
            .with_probe(Arc::new(probe))
            .with_image_source(Arc::new(images)),
    );

    let _watcher = if config.watch_music && !roots.is_empty() {
        match start_watcher(
            Arc::clone(&indexer),
            &roots,
            Duration::from_secs(config.watch_debounce_secs),
        ) {
            Ok(watcher) => Some(watcher),
            Err(err) => {
                warn!("Failed to start watcher: {}", err);
                None
            }
        }
    } else {
        info!("Watcher disabled (watch_music=false or no root_dirs)");
        None
    };

    let mut ticker = tokio::time::interval(scan_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut scheduled: Option<JoinHandle<()>> = None;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if scheduled.as_ref().is_some_and(|task| !task.is_finished()) {
                    info!("Previous scheduled scan still running; skipping this one");
                    continue;
                }
                scheduled = Some(spawn_session(Arc::clone(&indexer), "scheduled"));
            }
            _ = &mut shutdown => break,
        }
    }

    // A fresh key stops the tag stage of any running session.
    indexer.sessions().begin(indexer.next_key());
    Ok(())
}

/// Runs one ingestion session on the blocking pool.
pub(crate) fn spawn_session(indexer: Arc<Indexer>, trigger: &'static str) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let key = indexer.next_key();
        info!("Starting {} session {}", trigger, key);
        match indexer.start_ingestion(key) {
            Ok(report) if report.skipped => {}
            Ok(report) => info!(
                "Session {} finished: {} new, {} removed, {} modified; {} tracks, {} albums, {} artists",
                key,
                report.tagging.tagged,
                report.removed,
                report.modified,
                report.catalog.tracks,
                report.catalog.albums,
                report.catalog.artists
            ),
            Err(err) if err.is_cancelled() => info!("Session {} cancelled", key),
            Err(err) => error!("Session {} failed: {}", key, err),
        }
    })
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                warn!("Failed to install terminate signal handler: {}", err);
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", err);
        }
    }

    info!("Shutdown signal received.");
}
