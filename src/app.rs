use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::{bail, Context, Result};

use crate::config::{self, Config};
use crate::dom_facts::{DomFactsProvider, FileSource, HttpPageSource, SnapshotFacts};
use crate::events::RuntimeEvent;
use crate::filename;
use crate::http::{self, HttpTransport};
use crate::logging::{self, TracingSink};
use crate::media::{self, DownloadOptions, MediaInfo, Progress};
use crate::navigation::BrowserNavigator;
use crate::runtime::{Adapters, Clock, Runtime, RuntimeDeps, SystemClock, Timeouts};
use crate::storage;

pub const DEFAULT_PAGE_URL: &str = "https://x.com/home";

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Page the runtime boots on.
    pub url: Option<String>,
    /// Boot, wait for in-flight work to settle, print the model and exit.
    pub once: bool,
    /// Local HTML file used for DOM facts instead of fetching the page.
    pub snapshot: Option<PathBuf>,
    pub config_file: Option<PathBuf>,
}

fn load_config(config_file: Option<PathBuf>) -> Result<Config> {
    let cfg = config::load(config::LoadOptions {
        config_file,
        env_prefix: None,
    })
    .context("load config")?;
    logging::init(&cfg.logging).context("init logging")?;
    tracing::debug!(
        config = %friendly_path(config::default_path().as_ref()),
        "configuration loaded"
    );
    Ok(cfg)
}

pub fn run(options: RunOptions) -> Result<()> {
    let cfg = load_config(options.config_file.clone())?;

    let store = Arc::new(
        storage::Store::open(storage::Options {
            path: cfg.storage.path.clone(),
        })
        .context("open storage")?,
    );

    let http_client: Arc<dyn HttpTransport> = Arc::new(
        http::Client::new(http::ClientConfig {
            user_agent: cfg.http.user_agent.clone(),
            timeout: cfg.runtime.http_request_timeout(),
            http_client: None,
        })
        .context("build http client")?,
    );

    let url = options
        .url
        .clone()
        .unwrap_or_else(|| DEFAULT_PAGE_URL.to_string());

    let dom_facts: Arc<dyn DomFactsProvider> = match options.snapshot.clone() {
        Some(path) => Arc::new(SnapshotFacts::new(FileSource::new(path, Some(url.clone())))),
        None => Arc::new(SnapshotFacts::new(HttpPageSource::new(
            http_client.clone(),
            url.clone(),
        ))),
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mut runtime = Runtime::new(RuntimeDeps {
        adapters: Adapters {
            storage: store,
            http: http_client,
            navigator: Arc::new(BrowserNavigator),
            dom_facts,
            log: Arc::new(TracingSink),
        },
        timeouts: Timeouts::from_config(&cfg.runtime),
        clock: clock.clone(),
        workers: cfg.runtime.workers,
    })
    .context("start runtime")?;

    runtime.dispatch(RuntimeEvent::Booted {
        url,
        now: clock.now_ms(),
    })?;

    if options.once {
        let settled = runtime.run_until_idle(cfg.runtime.settle_timeout);
        if !settled {
            tracing::warn!(
                timeout = ?cfg.runtime.settle_timeout,
                "runtime did not settle before the deadline"
            );
        }
        let model = runtime.model();
        runtime.stop();
        println!(
            "{}",
            serde_json::to_string_pretty(&model).context("encode model")?
        );
        return Ok(());
    }

    spawn_stdin_reader(&runtime)?;
    runtime.run();
    Ok(())
}

/// Feeds newline-delimited JSON events from stdin into the runtime. End of
/// input stops the runtime.
fn spawn_stdin_reader(runtime: &Runtime) -> Result<()> {
    let handle = runtime.handle();
    thread::Builder::new()
        .name("xeg-stdin".into())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match handle.dispatch_json(line) {
                    Ok(_) => {}
                    Err(err) if handle.is_stopped() => {
                        tracing::debug!(error = %format!("{err:#}"), "stdin: runtime stopped");
                        break;
                    }
                    Err(err) => tracing::warn!(error = %format!("{err:#}"), "stdin: rejected event"),
                }
            }
            handle.stop();
        })
        .context("spawn stdin reader")?;
    Ok(())
}

/// Downloads `urls` into a ZIP archive in `dir`. A status URL among them
/// (`https://x.com/<user>/status/<id>`) names the tweet the media belongs to.
pub fn download(dir: &Path, urls: &[String], config_file: Option<PathBuf>) -> Result<()> {
    let cfg = load_config(config_file)?;

    let tweet = urls.iter().find_map(|url| filename::parse_status_url(url));
    let items: Vec<MediaInfo> = urls
        .iter()
        .filter(|url| filename::parse_status_url(url).is_none())
        .enumerate()
        .map(|(idx, url)| {
            let mut item = MediaInfo::new(url.as_str());
            if let Some((username, tweet_id)) = tweet.as_ref() {
                item.id = format!("{tweet_id}_media_{idx}");
                item.tweet_username = Some(username.clone());
                item.tweet_id = Some(tweet_id.clone());
            }
            item
        })
        .collect();

    let manager = media::Manager::new(media::Config {
        dir: Some(dir.to_path_buf()),
        workers: cfg.download.workers,
        fallback_prefix: cfg.download.fallback_prefix.clone(),
        zip_prefix: cfg.download.zip_prefix.clone(),
        retries: cfg.download.retries,
        user_agent: cfg.http.user_agent.clone(),
        http_client: None,
    })
    .context("start download manager")?;

    let result = manager.download_bulk(
        &items,
        DownloadOptions {
            on_progress: Some(Box::new(|progress: &Progress| {
                tracing::info!(
                    phase = ?progress.phase,
                    current = progress.current,
                    total = progress.total,
                    "download progress"
                );
            })),
            retries: cfg.download.retries,
            ..DownloadOptions::default()
        },
    );

    println!(
        "{}",
        serde_json::to_string_pretty(&result).context("encode download result")?
    );
    if !result.success {
        bail!(
            "download failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn friendly_path(path: Option<&PathBuf>) -> String {
    if let Some(path) = path {
        if let Some(home) = dirs::home_dir() {
            if let Ok(stripped) = path.strip_prefix(&home) {
                let mut display = String::from("~");
                if !stripped.as_os_str().is_empty() {
                    display.push_str(&format!("/{}", stripped.display()));
                }
                return display;
            }
        }
        path.display().to_string()
    } else {
        "~/.config/xeg-runtime/config.yaml".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn friendly_path_falls_back_to_default() {
        assert_eq!(friendly_path(None), "~/.config/xeg-runtime/config.yaml");
    }

    #[test]
    fn friendly_path_keeps_paths_outside_home() {
        let path = PathBuf::from("/etc/xeg/config.yaml");
        if dirs::home_dir().is_some_and(|home| path.starts_with(home)) {
            return;
        }
        assert_eq!(friendly_path(Some(&path)), "/etc/xeg/config.yaml");
    }
}
