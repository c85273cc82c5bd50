mod config;
mod watch;

use std::env;
use std::time::Duration;

use library::{IssueKind, Library, ScanReport};
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::{config_path_from_env, load_or_create_config, SyncConfig};

const USAGE: &str = "usage: library_sync [sync | watch | lyrics <track_id> | stats]";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = env::args().skip(1);
    let command = args.next().unwrap_or_else(|| "sync".to_string());

    let config_path = config_path_from_env();
    let (config, created) = load_or_create_config(&config_path)?;
    if created {
        info!("Created default config at {:?}", config_path);
    } else {
        info!("Loaded config from {:?}", config_path);
    }
    if config.roots.is_empty() && matches!(command.as_str(), "sync" | "watch") {
        return Err(format!("no roots configured in {:?}", config_path).into());
    }

    let library = Library::open(config.library_options(&config_path))?;

    match command.as_str() {
        "sync" | "watch" => {
            let report = library.sync()?;
            print_report(&report);
            if keeps_watching(&command, &config) {
                let debounce = Duration::from_secs(config.watch_debounce_secs.max(1));
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .enable_all()
                    .build()?;
                runtime.block_on(watch::run(library, debounce))?;
            } else {
                info!("Watcher disabled (watch=false)");
            }
        }
        "lyrics" => {
            let track_id = args.next().ok_or(USAGE)?;
            match library.get_lyrics(&track_id)? {
                Some(parsed) => println!("{}", serde_json::to_string_pretty(&parsed)?),
                None => return Err(format!("no lyrics for track {}", track_id).into()),
            }
        }
        "stats" => {
            let stats = library.stats()?;
            println!("Catalog: {} albums, {} tracks", stats.albums, stats.tracks);
        }
        _ => return Err(USAGE.into()),
    }

    Ok(())
}

/// `watch` always keeps running; plain `sync` does when the config sets `watch`.
fn keeps_watching(command: &str, config: &SyncConfig) -> bool {
    match command {
        "watch" => true,
        "sync" => config.watch,
        _ => false,
    }
}

fn print_report(report: &ScanReport) {
    println!(
        "Synced: {} added, {} updated, {} removed, {} lyrics refreshed, {} unchanged",
        report.added, report.updated, report.removed, report.lyrics_refreshed, report.unchanged
    );
    println!(
        "        {} new albums, {} covers written, {} skipped, {} cover fallbacks",
        report.albums_created,
        report.covers_written,
        report.skipped(),
        report.issues_of(IssueKind::Codec)
    );
}
