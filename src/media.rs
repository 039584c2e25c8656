use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use reqwest::blocking::Client;
use reqwest::header::USER_AGENT;
use serde::{Deserialize, Serialize};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::filename::{self, FilenameOptions, IndexHint, ZipFilenameOptions};

/// First pause between attempts; doubles after every retry.
pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);
const CANCEL_POLL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    #[default]
    Image,
    Video,
    Gif,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceLocation {
    #[default]
    Original,
    Quoted,
}

/// A single downloadable item as extracted from a tweet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    #[serde(default)]
    pub id: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_url: Option<String>,
    #[serde(default, rename = "type")]
    pub media_type: MediaType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tweet_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tweet_username: Option<String>,
    #[serde(default)]
    pub source_location: SourceLocation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quoted_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quoted_tweet_id: Option<String>,
}

impl MediaInfo {
    /// Builds an item from a bare URL, guessing the type from the path.
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let lower = url.to_ascii_lowercase();
        let path = lower.split(['?', '#']).next().unwrap_or_default();
        let media_type = if path.ends_with(".gif") || path.contains("tweet_video") {
            MediaType::Gif
        } else if path.contains("video.twimg.com")
            || path.ends_with(".mp4")
            || path.ends_with(".mov")
            || path.ends_with(".avi")
        {
            MediaType::Video
        } else {
            MediaType::Image
        };
        Self {
            url,
            media_type,
            ..Self::default()
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self.media_type, MediaType::Video | MediaType::Gif)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub dir: Option<PathBuf>,
    pub workers: usize,
    pub fallback_prefix: Option<String>,
    pub zip_prefix: Option<String>,
    /// Extra attempts for single downloads.
    pub retries: usize,
    pub user_agent: String,
    pub http_client: Option<Client>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir: None,
            workers: 3,
            fallback_prefix: None,
            zip_prefix: None,
            retries: 0,
            user_agent: format!("xeg-runtime/{}", crate::VERSION),
            http_client: None,
        }
    }
}

/// Where a worker puts the downloaded bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Destination {
    /// The manager's download directory.
    #[default]
    DownloadDir,
    Dir(PathBuf),
    /// Hand the bytes back in [`DownloadOutcome::data`].
    Memory,
}

#[derive(Debug, Clone, Default)]
pub struct DownloadRequest {
    pub media: MediaInfo,
    /// One-based position inside the tweet, used when the media id has none.
    pub index: usize,
    /// Overrides the derived filename.
    pub filename: Option<String>,
    pub destination: Destination,
    /// Transport errors and 5xx responses are retried this many times.
    pub retries: usize,
    pub cancel: Option<Arc<AtomicBool>>,
}

#[derive(Debug, Default)]
pub struct DownloadOutcome {
    pub url: String,
    pub filename: String,
    pub path: Option<PathBuf>,
    pub data: Option<Vec<u8>>,
    pub error: Option<anyhow::Error>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressPhase {
    Preparing,
    Downloading,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub phase: ProgressPhase,
    pub current: usize,
    pub total: usize,
    pub percentage: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

pub type ProgressFn = Box<dyn Fn(&Progress) + Send + Sync>;

pub struct DownloadOptions {
    pub include_images: bool,
    pub include_videos: bool,
    pub max_files: Option<usize>,
    pub retries: usize,
    pub cancel: Option<Arc<AtomicBool>>,
    pub on_progress: Option<ProgressFn>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            include_images: true,
            include_videos: true,
            max_files: None,
            retries: 0,
            cancel: None,
            on_progress: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedItem {
    pub url: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResult {
    pub success: bool,
    pub files_processed: usize,
    pub files_successful: usize,
    pub failed: Vec<FailedItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle: Option<PathBuf>,
}

impl DownloadResult {
    fn failure(message: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            ..Self::default()
        }
    }
}

struct Job {
    request: DownloadRequest,
    tx: Sender<DownloadOutcome>,
}

struct Inner {
    cfg: Config,
    dir: PathBuf,
    client: Client,
    jobs: Sender<Job>,
    stop: Sender<()>,
}

/// Downloads media on a fixed pool of worker threads.
pub struct Manager {
    inner: Arc<Inner>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl Manager {
    pub fn new(cfg: Config) -> Result<Self> {
        let mut cfg = cfg;
        if cfg.workers == 0 {
            cfg.workers = 3;
        }
        if cfg.user_agent.trim().is_empty() {
            bail!("media: user agent required");
        }
        let dir = cfg
            .dir
            .clone()
            .or_else(default_download_dir)
            .context("media: download dir not configured")?;

        let client = if let Some(client) = cfg.http_client.clone() {
            client
        } else {
            Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .context("media: build http client")?
        };

        let (job_tx, job_rx) = unbounded();
        let (stop_tx, stop_rx) = unbounded();

        let inner = Arc::new(Inner {
            cfg,
            dir,
            client,
            jobs: job_tx,
            stop: stop_tx,
        });

        let mut handles = Vec::new();
        for idx in 0..inner.cfg.workers {
            let rx_jobs = job_rx.clone();
            let rx_stop = stop_rx.clone();
            let worker_inner = inner.clone();
            let handle = thread::Builder::new()
                .name(format!("xeg-download-{idx}"))
                .spawn(move || worker_inner.worker(rx_jobs, rx_stop))
                .context("media: spawn worker")?;
            handles.push(handle);
        }

        Ok(Self { inner, handles })
    }

    pub fn enqueue(&self, request: DownloadRequest) -> Receiver<DownloadOutcome> {
        let (tx, rx) = unbounded();
        let job = Job { request, tx };
        if let Err(err) = self.inner.jobs.send(job) {
            let job = err.into_inner();
            let _ = job.tx.send(DownloadOutcome {
                url: job.request.media.url.clone(),
                error: Some(anyhow!("media: manager stopped")),
                ..DownloadOutcome::default()
            });
        }
        rx
    }

    /// Downloads one item straight into the download directory.
    pub fn download_single(&self, media: &MediaInfo) -> Result<PathBuf> {
        let outcome = self
            .enqueue(DownloadRequest {
                media: media.clone(),
                index: 1,
                retries: self.inner.cfg.retries,
                ..DownloadRequest::default()
            })
            .recv()
            .context("media: worker dropped request")?;
        match (outcome.path, outcome.error) {
            (_, Some(err)) => Err(err),
            (Some(path), None) => Ok(path),
            (None, None) => Err(anyhow!("media: no file written for {}", outcome.url)),
        }
    }

    /// Downloads several items and packs them, uncompressed, into one ZIP
    /// archive in the download directory. Partial failures still produce an
    /// archive; `bundle` is only set when one was written.
    pub fn download_bulk(&self, items: &[MediaInfo], options: DownloadOptions) -> DownloadResult {
        if items.is_empty() {
            return DownloadResult::failure("No media items provided");
        }

        let mut selected: Vec<&MediaInfo> = items
            .iter()
            .filter(|item| {
                if item.is_video() {
                    options.include_videos
                } else {
                    options.include_images
                }
            })
            .collect();
        if let Some(max) = options.max_files {
            selected.truncate(max);
        }
        if selected.is_empty() {
            return DownloadResult::failure("No media items provided");
        }

        let is_cancelled = || is_set(options.cancel.as_deref());
        let report = |phase: ProgressPhase, current: usize, filename: Option<String>| {
            if let Some(callback) = options.on_progress.as_ref() {
                let total = selected.len();
                let percentage = if total == 0 {
                    100
                } else {
                    ((current * 100) / total).min(100) as u8
                };
                callback(&Progress {
                    phase,
                    current,
                    total,
                    percentage,
                    filename,
                });
            }
        };

        report(ProgressPhase::Preparing, 0, None);
        if is_cancelled() {
            return DownloadResult::failure("Download cancelled");
        }

        let owned: Vec<MediaInfo> = selected.iter().map(|item| (*item).clone()).collect();
        let zip_name = filename::generate_zip_filename(
            &owned,
            &ZipFilenameOptions {
                fallback_prefix: self.inner.cfg.zip_prefix.clone(),
            },
        );
        let mut used = HashSet::new();
        let receivers: Vec<_> = owned
            .into_iter()
            .enumerate()
            .map(|(idx, media)| {
                let name = self.inner.filename_for(&media, idx + 1);
                let name = unique_name(&mut used, name);
                self.enqueue(DownloadRequest {
                    media,
                    index: idx + 1,
                    filename: Some(name),
                    destination: Destination::Memory,
                    retries: options.retries,
                    cancel: options.cancel.clone(),
                })
            })
            .collect();

        let mut result = DownloadResult::default();
        let mut entries: Vec<(String, Vec<u8>)> = Vec::new();
        for rx in receivers {
            let outcome = match rx.recv() {
                Ok(outcome) => outcome,
                Err(_) => DownloadOutcome {
                    error: Some(anyhow!("media: worker dropped request")),
                    ..DownloadOutcome::default()
                },
            };
            result.files_processed += 1;
            match outcome.error {
                None => {
                    result.files_successful += 1;
                    entries.push((outcome.filename.clone(), outcome.data.unwrap_or_default()));
                }
                Some(err) => {
                    tracing::warn!(url = %outcome.url, error = %format!("{err:#}"), "media: download failed");
                    result.failed.push(FailedItem {
                        url: outcome.url,
                        error: format!("{err:#}"),
                    });
                }
            }
            report(
                ProgressPhase::Downloading,
                result.files_processed,
                Some(outcome.filename),
            );
        }

        result.success = result.files_successful > 0;
        if !result.success {
            result.error = Some(if is_cancelled() {
                "Download cancelled".to_string()
            } else {
                "All downloads failed".to_string()
            });
        } else {
            let archive = self.inner.dir.join(&zip_name);
            match write_archive(&archive, &entries) {
                Ok(()) => result.bundle = Some(archive),
                Err(err) => {
                    tracing::warn!(path = %archive.display(), error = %format!("{err:#}"), "media: archive failed");
                    result.success = false;
                    result.error = Some(format!("{err:#}"));
                }
            }
        }
        report(ProgressPhase::Complete, result.files_processed, None);
        result
    }

    fn shutdown(&mut self) {
        for _ in &self.handles {
            let _ = self.inner.stop.send(());
        }
        while let Some(handle) = self.handles.pop() {
            let _ = handle.join();
        }
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    fn worker(&self, jobs: Receiver<Job>, stop: Receiver<()>) {
        loop {
            crossbeam_channel::select! {
                recv(stop) -> _ => break,
                recv(jobs) -> msg => {
                    match msg {
                        Ok(job) => self.process(job),
                        Err(_) => break,
                    }
                }
            }
        }
    }

    fn filename_for(&self, media: &MediaInfo, index: usize) -> String {
        filename::generate_media_filename(
            media,
            &FilenameOptions {
                index: Some(IndexHint::from(index)),
                fallback_prefix: self.cfg.fallback_prefix.clone(),
                ..FilenameOptions::default()
            },
        )
    }

    fn process(&self, job: Job) {
        let request = job.request;
        let filename = request
            .filename
            .clone()
            .unwrap_or_else(|| self.filename_for(&request.media, request.index.max(1)));
        let mut outcome = DownloadOutcome {
            url: request.media.url.clone(),
            filename,
            ..DownloadOutcome::default()
        };
        let delivered = self
            .fetch(&request)
            .and_then(|bytes| self.deliver(&request.destination, &mut outcome, bytes));
        if let Err(err) = delivered {
            outcome.error = Some(err);
        }
        let _ = job.tx.send(outcome);
    }

    fn fetch(&self, request: &DownloadRequest) -> Result<Vec<u8>> {
        let cancel = request.cancel.as_deref();
        if is_set(cancel) {
            bail!("media: download cancelled");
        }
        if request.media.url.is_empty() {
            bail!("media: url required");
        }

        let mut delay = RETRY_BASE_DELAY;
        let mut attempt = 0;
        loop {
            let err = match self.attempt(&request.media.url) {
                Ok(bytes) => return Ok(bytes),
                Err(Attempt::Fatal(err)) => return Err(err),
                Err(Attempt::Retry(err)) => err,
            };
            if attempt >= request.retries {
                return Err(err);
            }
            attempt += 1;
            tracing::debug!(
                url = %request.media.url,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %format!("{err:#}"),
                "media: retrying download"
            );
            if !pause(delay, cancel) {
                bail!("media: download cancelled");
            }
            delay = delay.saturating_mul(2);
        }
    }

    fn attempt(&self, url: &str) -> Result<Vec<u8>, Attempt> {
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, &self.cfg.user_agent)
            .send()
            .context("media: download")
            .map_err(Attempt::Retry)?;

        let status = response.status();
        if status.is_server_error() {
            return Err(Attempt::Retry(anyhow!("media: request failed: {status}")));
        }
        if !status.is_success() {
            return Err(Attempt::Fatal(anyhow!("media: request failed: {status}")));
        }
        response
            .bytes()
            .map(|bytes| bytes.to_vec())
            .context("media: body")
            .map_err(Attempt::Retry)
    }

    fn deliver(
        &self,
        destination: &Destination,
        outcome: &mut DownloadOutcome,
        bytes: Vec<u8>,
    ) -> Result<()> {
        let dir = match destination {
            Destination::Memory => {
                outcome.data = Some(bytes);
                return Ok(());
            }
            Destination::DownloadDir => &self.dir,
            Destination::Dir(dir) => dir,
        };
        fs::create_dir_all(dir)
            .with_context(|| format!("media: create directory {}", dir.display()))?;
        let path = dir.join(&outcome.filename);
        fs::write(&path, &bytes).with_context(|| format!("media: write {}", path.display()))?;
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "media: saved");
        outcome.path = Some(path);
        Ok(())
    }
}

/// Failure of one HTTP attempt, split by whether another try may help.
enum Attempt {
    Retry(anyhow::Error),
    Fatal(anyhow::Error),
}

fn is_set(flag: Option<&AtomicBool>) -> bool {
    flag.is_some_and(|flag| flag.load(Ordering::SeqCst))
}

/// Sleeps for `delay`; returns false as soon as `cancel` is raised.
fn pause(delay: Duration, cancel: Option<&AtomicBool>) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        if is_set(cancel) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(CANCEL_POLL));
    }
}

fn write_archive(path: &Path, entries: &[(String, Vec<u8>)]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("media: create directory {}", parent.display()))?;
    }
    let file = File::create(path).with_context(|| format!("media: create {}", path.display()))?;
    let mut archive = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    for (name, data) in entries {
        archive
            .start_file(name.as_str(), options)
            .with_context(|| format!("media: add {name} to archive"))?;
        archive
            .write_all(data)
            .with_context(|| format!("media: write {name} to archive"))?;
    }
    archive.finish().context("media: finish archive")?;
    tracing::debug!(path = %path.display(), entries = entries.len(), "media: archive written");
    Ok(())
}

fn unique_name(used: &mut HashSet<String>, name: String) -> String {
    if used.insert(name.clone()) {
        return name;
    }
    let (stem, ext) = match name.rfind('.') {
        Some(dot) if dot > 0 => (&name[..dot], &name[dot..]),
        _ => (name.as_str(), ""),
    };
    let mut counter = 1;
    loop {
        let candidate = format!("{stem}-{counter}{ext}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        counter += 1;
    }
}

fn default_download_dir() -> Option<PathBuf> {
    dirs::download_dir().map(|dir| dir.join("xeg"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::io::Read;
    use tempfile::tempdir;
    use tiny_http::{Response, Server};

    /// Serves `count` requests; paths containing "missing" get a 404 and
    /// "flaky" paths fail with a 500 the first time they are requested.
    fn serve(count: usize) -> (String, thread::JoinHandle<()>) {
        let server = Server::http("127.0.0.1:0").unwrap();
        let addr = format!("http://{}", server.server_addr().to_ip().unwrap());
        let handle = thread::spawn(move || {
            let mut seen = HashSet::new();
            for _ in 0..count {
                let request = server.recv().unwrap();
                let path = request.url().to_string();
                let response = if path.contains("missing") {
                    Response::from_string("gone").with_status_code(404)
                } else if path.contains("flaky") && seen.insert(path) {
                    Response::from_string("busy").with_status_code(500)
                } else {
                    Response::from_string(format!("bytes for {}", request.url()))
                };
                request.respond(response).unwrap();
            }
        });
        (addr, handle)
    }

    fn manager(dir: &Path) -> Manager {
        Manager::new(Config {
            dir: Some(dir.to_path_buf()),
            workers: 2,
            ..Config::default()
        })
        .unwrap()
    }

    fn archive_entries(path: &Path) -> Vec<(String, String)> {
        let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        (0..archive.len())
            .map(|i| {
                let mut entry = archive.by_index(i).unwrap();
                assert_eq!(entry.compression(), CompressionMethod::Stored);
                let mut body = String::new();
                entry.read_to_string(&mut body).unwrap();
                (entry.name().to_string(), body)
            })
            .collect()
    }

    fn tweet_media(url: String, id: &str) -> MediaInfo {
        MediaInfo {
            id: id.into(),
            tweet_username: Some("alice".into()),
            tweet_id: Some("123".into()),
            ..MediaInfo::new(url)
        }
    }

    #[test]
    fn infers_media_type_from_url() {
        assert_eq!(
            MediaInfo::new("https://pbs.twimg.com/media/abc.jpg").media_type,
            MediaType::Image
        );
        assert!(MediaInfo::new("https://video.twimg.com/ext_tw_video/1/clip.mp4?tag=1").is_video());
        assert_eq!(
            MediaInfo::new("https://video.twimg.com/tweet_video/abc.mp4").media_type,
            MediaType::Gif
        );
    }

    #[test]
    fn bulk_download_writes_archive() {
        let (addr, server) = serve(2);
        let dir = tempdir().unwrap();
        let manager = manager(dir.path());
        let phases = Arc::new(Mutex::new(Vec::new()));
        let seen = phases.clone();

        let items = vec![
            tweet_media(format!("{addr}/media/a.jpg"), "123_media_0"),
            tweet_media(format!("{addr}/media/b.png"), "123_media_1"),
        ];
        let result = manager.download_bulk(
            &items,
            DownloadOptions {
                on_progress: Some(Box::new(move |p: &Progress| seen.lock().push(p.phase))),
                ..DownloadOptions::default()
            },
        );
        server.join().unwrap();

        assert!(result.success, "{result:?}");
        assert_eq!(result.files_processed, 2);
        assert_eq!(result.files_successful, 2);
        let archive = dir.path().join("alice_123.zip");
        assert_eq!(result.bundle.as_deref(), Some(archive.as_path()));
        assert_eq!(
            archive_entries(&archive),
            vec![
                ("alice_123_1.jpg".to_string(), "bytes for /media/a.jpg".to_string()),
                ("alice_123_2.png".to_string(), "bytes for /media/b.png".to_string()),
            ]
        );
        assert!(!dir.path().join("alice_123_1.jpg").exists());

        let phases = phases.lock();
        assert_eq!(phases.first(), Some(&ProgressPhase::Preparing));
        assert_eq!(phases.last(), Some(&ProgressPhase::Complete));
        assert_eq!(
            phases
                .iter()
                .filter(|p| **p == ProgressPhase::Downloading)
                .count(),
            2
        );
    }

    #[test]
    fn empty_input_is_rejected() {
        let dir = tempdir().unwrap();
        let result = manager(dir.path()).download_bulk(&[], DownloadOptions::default());
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("No media items provided"));
    }

    #[test]
    fn filters_and_limits_items() {
        let (addr, server) = serve(1);
        let dir = tempdir().unwrap();
        let items = vec![
            tweet_media(format!("{addr}/clip.mp4"), "123_media_0"),
            tweet_media(format!("{addr}/one.jpg"), "123_media_1"),
            tweet_media(format!("{addr}/two.jpg"), "123_media_2"),
        ];
        let result = manager(dir.path()).download_bulk(
            &items,
            DownloadOptions {
                include_videos: false,
                max_files: Some(1),
                ..DownloadOptions::default()
            },
        );
        server.join().unwrap();
        assert_eq!(result.files_processed, 1);
        let names: Vec<String> = archive_entries(&dir.path().join("alice_123.zip"))
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["alice_123_2.jpg".to_string()]);
    }

    #[test]
    fn colliding_names_are_unique_in_archive() {
        let (addr, server) = serve(2);
        let dir = tempdir().unwrap();
        let items = vec![
            tweet_media(format!("{addr}/first.jpg"), "123_media_0"),
            tweet_media(format!("{addr}/second.jpg"), "123_media_0"),
        ];
        let result = manager(dir.path()).download_bulk(&items, DownloadOptions::default());
        server.join().unwrap();
        assert!(result.success, "{result:?}");
        let names: Vec<String> = archive_entries(&dir.path().join("alice_123.zip"))
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(
            names,
            vec!["alice_123_1.jpg".to_string(), "alice_123_1-1.jpg".to_string()]
        );
    }

    #[test]
    fn failures_are_reported_per_item() {
        let (addr, server) = serve(2);
        let dir = tempdir().unwrap();
        let items = vec![
            tweet_media(format!("{addr}/ok.jpg"), "123_media_0"),
            tweet_media(format!("{addr}/missing.jpg"), "123_media_1"),
        ];
        let result = manager(dir.path()).download_bulk(&items, DownloadOptions::default());
        server.join().unwrap();
        assert!(result.success);
        assert_eq!(result.files_successful, 1);
        assert_eq!(result.failed.len(), 1);
        assert!(result.failed[0].url.ends_with("/missing.jpg"));
        assert!(result.failed[0].error.contains("404"));
        assert_eq!(archive_entries(result.bundle.as_deref().unwrap()).len(), 1);
    }

    #[test]
    fn nothing_downloaded_writes_no_archive() {
        let (addr, server) = serve(1);
        let dir = tempdir().unwrap();
        let items = vec![tweet_media(format!("{addr}/missing.jpg"), "123_media_0")];
        let result = manager(dir.path()).download_bulk(&items, DownloadOptions::default());
        server.join().unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("All downloads failed"));
        assert!(result.bundle.is_none());
        assert!(!dir.path().join("alice_123.zip").exists());
    }

    #[test]
    fn server_errors_are_retried() {
        let (addr, server) = serve(2);
        let dir = tempdir().unwrap();
        let items = vec![tweet_media(format!("{addr}/flaky.jpg"), "123_media_0")];
        let started = Instant::now();
        let result = manager(dir.path()).download_bulk(
            &items,
            DownloadOptions {
                retries: 1,
                ..DownloadOptions::default()
            },
        );
        server.join().unwrap();
        assert!(result.success, "{result:?}");
        assert!(started.elapsed() >= RETRY_BASE_DELAY);
        assert_eq!(
            archive_entries(&dir.path().join("alice_123.zip")),
            vec![("alice_123_1.jpg".to_string(), "bytes for /flaky.jpg".to_string())]
        );
    }

    #[test]
    fn server_error_without_retries_fails() {
        let (addr, server) = serve(1);
        let dir = tempdir().unwrap();
        let items = vec![tweet_media(format!("{addr}/flaky.jpg"), "123_media_0")];
        let result = manager(dir.path()).download_bulk(&items, DownloadOptions::default());
        server.join().unwrap();
        assert!(!result.success);
        assert!(result.failed[0].error.contains("500"));
    }

    #[test]
    fn client_errors_are_not_retried() {
        // Only one request is served; a retry would fail to connect instead.
        let (addr, server) = serve(1);
        let dir = tempdir().unwrap();
        let items = vec![tweet_media(format!("{addr}/missing.jpg"), "123_media_0")];
        let result = manager(dir.path()).download_bulk(
            &items,
            DownloadOptions {
                retries: 3,
                ..DownloadOptions::default()
            },
        );
        server.join().unwrap();
        assert_eq!(result.failed.len(), 1);
        assert!(result.failed[0].error.contains("404"));
    }

    #[test]
    fn cancel_interrupts_retry_pause() {
        let flag = AtomicBool::new(false);
        assert!(pause(Duration::from_millis(10), Some(&flag)));
        flag.store(true, Ordering::SeqCst);
        let started = Instant::now();
        assert!(!pause(Duration::from_secs(5), Some(&flag)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn cancelled_before_start() {
        let dir = tempdir().unwrap();
        let items = vec![MediaInfo::new("http://127.0.0.1:9/a.jpg")];
        let result = manager(dir.path()).download_bulk(
            &items,
            DownloadOptions {
                cancel: Some(Arc::new(AtomicBool::new(true))),
                ..DownloadOptions::default()
            },
        );
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Download cancelled"));
        assert_eq!(result.files_processed, 0);
    }

    #[test]
    fn single_download_uses_download_dir() {
        let (addr, server) = serve(1);
        let dir = tempdir().unwrap();
        let item = tweet_media(format!("{addr}/solo.webp"), "123_media_0");
        let path = manager(dir.path()).download_single(&item).unwrap();
        server.join().unwrap();
        assert_eq!(path, dir.path().join("alice_123_1.webp"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "bytes for /solo.webp");
    }

    #[test]
    fn duplicate_names_get_suffixes() {
        let mut used = HashSet::new();
        assert_eq!(unique_name(&mut used, "a_1_1.jpg".into()), "a_1_1.jpg");
        assert_eq!(unique_name(&mut used, "a_1_1.jpg".into()), "a_1_1-1.jpg");
        assert_eq!(unique_name(&mut used, "a_1_1.jpg".into()), "a_1_1-2.jpg");
    }
}
