//! Per-album cover acquisition: resolve the cover URL, stream the
//! download, crop a thumbnail, cache it on disk and notify the caller.
//!
//! Every task is independent of the serial worker and of its siblings.
//! Cancellation is cooperative and checked at each phase boundary; a
//! cancelled task never fires its callback and never writes its cache
//! artifact after cancellation is observed.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use image::{imageops::FilterType, DynamicImage, GenericImageView};
use reqwest::{header, Client, Url};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::config::CoverServerConfig;
use crate::model::Album;

/// Gauge of transfers currently on the wire, shared by all tasks of one
/// fetcher. Incremented when a transfer begins, decremented exactly once
/// when the task reaches any terminal state thereafter.
#[derive(Clone, Default)]
pub struct NetworkActivity(Arc<AtomicUsize>);

impl NetworkActivity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_flight(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn begin(&self) -> TransferGuard {
        self.0.fetch_add(1, Ordering::SeqCst);
        TransferGuard(Arc::clone(&self.0))
    }
}

/// Decrements the gauge on drop, covering every exit path once.
struct TransferGuard(Arc<AtomicUsize>);

impl Drop for TransferGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverTaskState {
    Pending,
    Fetching,
    Processing,
    Done,
    Cancelled,
}

const TASK_PENDING: u8 = 0;
const TASK_FETCHING: u8 = 1;
const TASK_PROCESSING: u8 = 2;
const TASK_DONE: u8 = 3;
const TASK_CANCELLED: u8 = 4;

type CoverCallback = Box<dyn FnOnce(DynamicImage, DynamicImage) + Send>;

/// Handle to one running cover task.
pub struct CoverHandle {
    cancelled: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
    join: JoinHandle<()>,
}

impl CoverHandle {
    /// Request cooperative cancellation. The task observes the flag at its
    /// next phase boundary or chunk.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn state(&self) -> CoverTaskState {
        match self.state.load(Ordering::SeqCst) {
            TASK_FETCHING => CoverTaskState::Fetching,
            TASK_PROCESSING => CoverTaskState::Processing,
            TASK_DONE => CoverTaskState::Done,
            TASK_CANCELLED => CoverTaskState::Cancelled,
            _ => CoverTaskState::Pending,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.state(),
            CoverTaskState::Done | CoverTaskState::Cancelled
        )
    }

    /// Wait for the task to reach a terminal state. At most one call.
    pub async fn wait(&mut self) {
        let _ = (&mut self.join).await;
    }
}

/// Spawns cover tasks. The number of simultaneous transfers is bounded by
/// an injected limit; excess tasks queue on the semaphore.
pub struct CoverFetcher {
    client: Client,
    config: Option<CoverServerConfig>,
    cache_dir: Option<PathBuf>,
    crop_size: u32,
    limit: Arc<Semaphore>,
    activity: NetworkActivity,
}

impl CoverFetcher {
    pub fn new(
        config: Option<CoverServerConfig>,
        cache_dir: Option<PathBuf>,
        crop_size: u32,
        max_transfers: usize,
    ) -> Self {
        Self::with_client(Client::new(), config, cache_dir, crop_size, max_transfers)
    }

    pub fn with_client(
        client: Client,
        config: Option<CoverServerConfig>,
        cache_dir: Option<PathBuf>,
        crop_size: u32,
        max_transfers: usize,
    ) -> Self {
        Self {
            client,
            config,
            cache_dir,
            crop_size,
            limit: Arc::new(Semaphore::new(max_transfers)),
            activity: NetworkActivity::new(),
        }
    }

    pub fn activity(&self) -> NetworkActivity {
        self.activity.clone()
    }

    /// Spawn one independent task for `album`. On success the callback
    /// receives the full cover and the cached thumbnail; on any failure or
    /// cancellation it is never invoked.
    pub fn fetch(
        &self,
        album: Album,
        callback: impl FnOnce(DynamicImage, DynamicImage) + Send + 'static,
    ) -> CoverHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let state = Arc::new(AtomicU8::new(TASK_PENDING));
        let task = CoverTask {
            album,
            client: self.client.clone(),
            config: self.config.clone(),
            cache_dir: self.cache_dir.clone(),
            crop_size: self.crop_size,
            limit: Arc::clone(&self.limit),
            activity: self.activity.clone(),
            cancelled: Arc::clone(&cancelled),
            state: Arc::clone(&state),
        };
        let join = tokio::spawn(task.run(Box::new(callback)));
        CoverHandle {
            cancelled,
            state,
            join,
        }
    }
}

struct CoverTask {
    album: Album,
    client: Client,
    config: Option<CoverServerConfig>,
    cache_dir: Option<PathBuf>,
    crop_size: u32,
    limit: Arc<Semaphore>,
    activity: NetworkActivity,
    cancelled: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
}

impl CoverTask {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: u8) {
        self.state.store(state, Ordering::SeqCst);
    }

    async fn run(self, callback: CoverCallback) {
        if self.is_cancelled() {
            debug!(album = %self.album.name, "cover task cancelled before start");
            self.set_state(TASK_CANCELLED);
            return;
        }

        let Some(path) = self.album.path.clone() else {
            error!(album = %self.album.name, "no path resolved for album");
            self.set_state(TASK_DONE);
            return;
        };
        let Some(config) = self.config.clone() else {
            error!(album = %self.album.name, "no cover web server configured");
            self.set_state(TASK_DONE);
            return;
        };
        if config.hostname.trim().is_empty() || config.cover_filename.trim().is_empty() {
            error!(
                hostname = %config.hostname,
                cover = %config.cover_filename,
                "cover web server configuration is invalid"
            );
            self.set_state(TASK_DONE);
            return;
        }

        let url_str = build_cover_url(&config, &path);
        let url = match Url::parse(&url_str) {
            Ok(url) => url,
            Err(e) => {
                error!(url = %url_str, error = %e, "invalid cover URL");
                self.set_state(TASK_DONE);
                return;
            }
        };

        let permit = match Arc::clone(&self.limit).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                self.set_state(TASK_DONE);
                return;
            }
        };
        if self.is_cancelled() {
            debug!(album = %self.album.name, "cover task cancelled before transfer");
            self.set_state(TASK_CANCELLED);
            return;
        }

        self.set_state(TASK_FETCHING);
        let _transfer = self.activity.begin();

        let response = match self
            .client
            .get(url)
            .header(header::ACCEPT, "image/*")
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!(album = %self.album.name, error = %e, "cover request failed");
                self.set_state(TASK_DONE);
                return;
            }
        };

        let mut data = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            if self.is_cancelled() {
                debug!(album = %self.album.name, "cover task cancelled mid-transfer");
                self.set_state(TASK_CANCELLED);
                return;
            }
            match chunk {
                Ok(bytes) => data.extend_from_slice(&bytes),
                Err(e) => {
                    error!(album = %self.album.name, error = %e, "cover transfer failed");
                    self.set_state(TASK_DONE);
                    return;
                }
            }
        }
        drop(permit);

        if self.is_cancelled() {
            debug!(album = %self.album.name, "cover task cancelled before processing");
            self.set_state(TASK_CANCELLED);
            return;
        }
        self.set_state(TASK_PROCESSING);
        self.process(&data, callback);
        self.set_state(TASK_DONE);
    }

    /// Decode, crop, cache, notify. Each failure is logged and absorbed;
    /// only a cache-write failure still lets the callback through.
    fn process(&self, data: &[u8], callback: CoverCallback) {
        let cover = match image::load_from_memory(data) {
            Ok(image) => image,
            Err(e) => {
                error!(
                    album = %self.album.name,
                    bytes = data.len(),
                    error = %e,
                    "invalid cover data"
                );
                return;
            }
        };
        let Some(thumbnail) = crop_thumbnail(&cover, self.crop_size) else {
            error!(album = %self.album.name, "failed to create thumbnail");
            return;
        };
        let Some(cache_dir) = self.cache_dir.as_deref() else {
            error!(album = %self.album.name, "no cover cache directory configured");
            return;
        };

        let dest = self.album.local_cover_path(cache_dir);
        if let Err(e) = write_thumbnail(&thumbnail, &dest) {
            error!(path = %dest.display(), error = %e, "failed to save cover");
        }
        callback(cover, thumbnail);
    }
}

/// `hostname:port` plus the percent-encoded album path and cover filename.
/// Path separators survive; every other reserved character is encoded.
fn build_cover_url(config: &CoverServerConfig, album_path: &str) -> String {
    let full = format!(
        "{}/{}",
        album_path.trim_end_matches('/'),
        config.cover_filename
    );
    let encoded = full
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/");
    let sep = if encoded.starts_with('/') { "" } else { "/" };
    format!("{}:{}{}{}", config.hostname, config.port, sep, encoded)
}

/// Largest centered square, resized to `size` on both edges.
fn crop_thumbnail(image: &DynamicImage, size: u32) -> Option<DynamicImage> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 || size == 0 {
        return None;
    }
    let side = width.min(height);
    let cropped = image.crop_imm((width - side) / 2, (height - side) / 2, side, side);
    Some(cropped.resize_exact(size, size, FilterType::Triangle))
}

fn write_thumbnail(thumbnail: &DynamicImage, dest: &Path) -> anyhow::Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    thumbnail.to_rgb8().save(dest)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoverServerConfig;

    fn config(hostname: &str) -> CoverServerConfig {
        CoverServerConfig {
            hostname: hostname.to_string(),
            port: 8080,
            cover_filename: "cover.jpg".to_string(),
        }
    }

    #[test]
    fn cover_url_joins_host_port_and_path() {
        let url = build_cover_url(&config("http://nas.local"), "/music/Blackstar");
        assert_eq!(url, "http://nas.local:8080/music/Blackstar/cover.jpg");
    }

    #[test]
    fn cover_url_encodes_segments_but_keeps_separators() {
        let url = build_cover_url(&config("http://nas.local"), "music/Massive Attack/Mezzanine");
        assert_eq!(
            url,
            "http://nas.local:8080/music/Massive%20Attack/Mezzanine/cover.jpg"
        );
    }

    #[test]
    fn cover_url_inserts_missing_leading_slash() {
        let url = build_cover_url(&config("http://nas.local"), "music/a");
        assert!(url.starts_with("http://nas.local:8080/music"));
    }

    #[test]
    fn crop_produces_requested_square() {
        let image = DynamicImage::new_rgb8(640, 480);
        let thumbnail = crop_thumbnail(&image, 180).unwrap();
        assert_eq!(thumbnail.dimensions(), (180, 180));
    }

    #[test]
    fn crop_rejects_degenerate_input() {
        let image = DynamicImage::new_rgb8(10, 10);
        assert!(crop_thumbnail(&image, 0).is_none());
    }

    #[test]
    fn activity_gauge_balances() {
        let activity = NetworkActivity::new();
        assert_eq!(activity.in_flight(), 0);
        {
            let _a = activity.begin();
            let _b = activity.begin();
            assert_eq!(activity.in_flight(), 2);
        }
        assert_eq!(activity.in_flight(), 0);
    }
}
