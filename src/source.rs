//! The music data source: owns the protocol session, serializes every
//! request onto one worker, heartbeats the server and caches the four
//! top-level entity lists.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ServerDescriptor;
use crate::model::{
    sort_by_name, Album, Artist, DisplayType, EntityList, Genre, Playlist, ServerStats,
};
use crate::session::{ProtocolSession, SessionFactory};

/// Period of the status heartbeat. The first tick fires immediately after
/// the session connects.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(20);

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("no music server configured")]
    NoServerConfigured,
    #[error("connection failed: {0}")]
    ConnectFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

const STATE_DISCONNECTED: u8 = 0;
const STATE_CONNECTING: u8 = 1;
const STATE_CONNECTED: u8 = 2;

type Job = Box<dyn FnOnce(&mut dyn ProtocolSession) + Send>;

enum Command {
    Run(Job),
    Shutdown,
}

#[derive(Default)]
struct LibraryCache {
    albums: Vec<Album>,
    genres: Vec<Genre>,
    artists: Vec<Artist>,
    playlists: Vec<Playlist>,
}

impl LibraryCache {
    fn album_mut(&mut self, name: &str) -> Option<&mut Album> {
        self.albums.iter_mut().find(|a| a.name == name)
    }
}

struct Worker {
    tx: Sender<Command>,
    join: JoinHandle<()>,
}

/// Owns at most one protocol session and the serial worker driving it.
///
/// Shared by `Arc` between UI collaborators; all methods take `&self`.
/// Cache writes happen only on the worker; readers get owned snapshots.
pub struct MusicSource {
    factory: Box<dyn SessionFactory>,
    heartbeat: Duration,
    server: Mutex<Option<ServerDescriptor>>,
    state: AtomicU8,
    display_type: Mutex<DisplayType>,
    cache: Arc<RwLock<LibraryCache>>,
    worker: Mutex<Option<Worker>>,
}

impl MusicSource {
    pub fn new(factory: impl SessionFactory + 'static) -> Self {
        Self::with_heartbeat(factory, DEFAULT_HEARTBEAT)
    }

    pub fn with_heartbeat(factory: impl SessionFactory + 'static, heartbeat: Duration) -> Self {
        Self {
            factory: Box::new(factory),
            heartbeat,
            server: Mutex::new(None),
            state: AtomicU8::new(STATE_DISCONNECTED),
            display_type: Mutex::new(DisplayType::default()),
            cache: Arc::new(RwLock::new(LibraryCache::default())),
            worker: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        match self.state.load(Ordering::SeqCst) {
            STATE_CONNECTING => ConnectionState::Connecting,
            STATE_CONNECTED => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn set_state(&self, state: u8) {
        self.state.store(state, Ordering::SeqCst);
    }

    /// Store a new server descriptor and reconnect against it. The old
    /// session is fully torn down before the new one opens.
    pub fn set_server(&self, server: ServerDescriptor) -> Result<(), SourceError> {
        self.deinitialize();
        *self.server.lock().unwrap() = Some(server);
        self.initialize()
    }

    pub fn server(&self) -> Option<ServerDescriptor> {
        self.server.lock().unwrap().clone()
    }

    /// Open the session and start the heartbeat. No-op when already
    /// connected. Connection failures leave the source Disconnected and
    /// carry the session's diagnostic.
    pub fn initialize(&self) -> Result<(), SourceError> {
        if self.is_connected() {
            return Ok(());
        }
        let server = self
            .server
            .lock()
            .unwrap()
            .clone()
            .ok_or(SourceError::NoServerConfigured)?;

        self.set_state(STATE_CONNECTING);
        let mut session = self.factory.open(&server);
        if let Err(e) = session.connect() {
            self.set_state(STATE_DISCONNECTED);
            return Err(SourceError::ConnectFailed(e.to_string()));
        }

        let (tx, rx) = mpsc::channel();
        let heartbeat = self.heartbeat;
        let join = thread::spawn(move || worker_loop(session, rx, heartbeat));
        *self.worker.lock().unwrap() = Some(Worker { tx, join });
        self.set_state(STATE_CONNECTED);
        debug!(server = %server.addr(), "session connected");
        Ok(())
    }

    /// Stop the heartbeat, disconnect and drop the session. Idempotent.
    pub fn deinitialize(&self) {
        let worker = self.worker.lock().unwrap().take();
        if let Some(worker) = worker {
            let _ = worker.tx.send(Command::Shutdown);
            let _ = worker.join.join();
            debug!("session torn down");
        }
        self.set_state(STATE_DISCONNECTED);
    }

    pub fn reinitialize(&self) -> Result<(), SourceError> {
        self.deinitialize();
        self.initialize()
    }

    /// Process moved to the background: tear the connection down entirely.
    pub fn suspend(&self) {
        self.deinitialize();
    }

    /// Process back in the foreground: reconnect.
    pub fn resume(&self) -> Result<(), SourceError> {
        self.reinitialize()
    }

    /// Hand a job to the serial worker. Dropped silently when no session
    /// is live; the caller's callback simply never fires.
    fn submit(&self, job: Job) {
        let worker = self.worker.lock().unwrap();
        match worker.as_ref() {
            Some(w) => {
                if w.tx.send(Command::Run(job)).is_err() {
                    debug!("worker gone, request dropped");
                }
            }
            None => debug!("not connected, request dropped"),
        }
    }

    /// Fetch the list for `display_type`, replacing the cached sequence
    /// wholesale on success, then signal `callback`. On failure the cache
    /// is left untouched and the callback never fires.
    pub fn get_list_for_display_type(
        &self,
        display_type: DisplayType,
        callback: impl FnOnce() + Send + 'static,
    ) {
        *self.display_type.lock().unwrap() = display_type;
        let cache = Arc::clone(&self.cache);
        self.submit(Box::new(move |session| {
            let outcome = match display_type {
                DisplayType::Albums => session.list_albums().map(|mut list| {
                    sort_by_name(&mut list);
                    cache.write().unwrap().albums = list;
                }),
                DisplayType::Genres => session.list_genres().map(|mut list| {
                    sort_by_name(&mut list);
                    cache.write().unwrap().genres = list;
                }),
                DisplayType::Artists => session.list_artists().map(|mut list| {
                    sort_by_name(&mut list);
                    cache.write().unwrap().artists = list;
                }),
                DisplayType::Playlists => session.list_playlists().map(|mut list| {
                    sort_by_name(&mut list);
                    cache.write().unwrap().playlists = list;
                }),
            };
            match outcome {
                Ok(()) => callback(),
                Err(e) => warn!(kind = ?display_type, error = %e, "list fetch failed"),
            }
        }));
    }

    pub fn get_albums_for_genre(
        &self,
        genre: &Genre,
        first_only: bool,
        callback: impl FnOnce(Vec<Album>) + Send + 'static,
    ) {
        let name = genre.name.clone();
        let cache = Arc::clone(&self.cache);
        self.submit(Box::new(move |session| {
            match session.albums_for_genre(&name, first_only) {
                Ok(albums) => {
                    if let Some(cached) = cache
                        .write()
                        .unwrap()
                        .genres
                        .iter_mut()
                        .find(|g| g.name == name)
                    {
                        cached.albums = Some(albums.clone());
                    }
                    callback(albums);
                }
                Err(e) => warn!(genre = %name, error = %e, "albums for genre failed"),
            }
        }));
    }

    pub fn get_albums_for_artist(
        &self,
        artist: &Artist,
        callback: impl FnOnce(Vec<Album>) + Send + 'static,
    ) {
        let name = artist.name.clone();
        let cache = Arc::clone(&self.cache);
        self.submit(Box::new(move |session| {
            match session.albums_for_artist(&name) {
                Ok(mut albums) => {
                    sort_by_name(&mut albums);
                    if let Some(cached) = cache
                        .write()
                        .unwrap()
                        .artists
                        .iter_mut()
                        .find(|a| a.name == name)
                    {
                        cached.albums = Some(albums.clone());
                    }
                    callback(albums);
                }
                Err(e) => warn!(artist = %name, error = %e, "albums for artist failed"),
            }
        }));
    }

    /// Unlike the other resolutions nothing owns the result, so the sorted
    /// artist list goes straight to the callback.
    pub fn get_artists_for_genre(
        &self,
        genre: &Genre,
        callback: impl FnOnce(Vec<Artist>) + Send + 'static,
    ) {
        let name = genre.name.clone();
        self.submit(Box::new(move |session| {
            match session.artists_for_genre(&name) {
                Ok(mut artists) => {
                    sort_by_name(&mut artists);
                    callback(artists);
                }
                Err(e) => warn!(genre = %name, error = %e, "artists for genre failed"),
            }
        }));
    }

    pub fn get_path_for_album(
        &self,
        album: &Album,
        callback: impl FnOnce(Album) + Send + 'static,
    ) {
        let mut album = album.clone();
        let cache = Arc::clone(&self.cache);
        self.submit(Box::new(move |session| {
            match session.path_for_album(&album) {
                Ok(path) => {
                    album.path = Some(path.clone());
                    if let Some(cached) = cache.write().unwrap().album_mut(&album.name) {
                        cached.path = Some(path);
                    }
                    callback(album);
                }
                Err(e) => warn!(album = %album.name, error = %e, "path for album failed"),
            }
        }));
    }

    /// Resolves tracks for each album in turn, signalling once per album
    /// in submission order. Callers wanting a whole-batch signal must
    /// count invocations themselves.
    pub fn get_tracks_for_albums(
        &self,
        albums: Vec<Album>,
        callback: impl Fn(Album) + Send + 'static,
    ) {
        let cache = Arc::clone(&self.cache);
        self.submit(Box::new(move |session| {
            for mut album in albums {
                match session.tracks_for_album(&album) {
                    Ok(tracks) => {
                        album.tracks = Some(tracks.clone());
                        if let Some(cached) = cache.write().unwrap().album_mut(&album.name) {
                            cached.tracks = Some(tracks);
                        }
                        callback(album);
                    }
                    Err(e) => warn!(album = %album.name, error = %e, "tracks for album failed"),
                }
            }
        }));
    }

    pub fn get_tracks_for_playlist(
        &self,
        playlist: &Playlist,
        callback: impl FnOnce(Playlist) + Send + 'static,
    ) {
        let mut playlist = playlist.clone();
        let cache = Arc::clone(&self.cache);
        self.submit(Box::new(move |session| {
            match session.tracks_for_playlist(&playlist.name) {
                Ok(tracks) => {
                    playlist.tracks = Some(tracks.clone());
                    if let Some(cached) = cache
                        .write()
                        .unwrap()
                        .playlists
                        .iter_mut()
                        .find(|p| p.name == playlist.name)
                    {
                        cached.tracks = Some(tracks);
                    }
                    callback(playlist);
                }
                Err(e) => {
                    warn!(playlist = %playlist.name, error = %e, "tracks for playlist failed")
                }
            }
        }));
    }

    pub fn get_metadata_for_album(
        &self,
        album: &Album,
        callback: impl FnOnce(Album) + Send + 'static,
    ) {
        let mut album = album.clone();
        let cache = Arc::clone(&self.cache);
        self.submit(Box::new(move |session| {
            match session.metadata_for_album(&album) {
                Ok(metadata) => {
                    if let Some(artist) = metadata.artist {
                        album.artist = artist;
                    }
                    if let Some(year) = metadata.year {
                        album.year = year;
                    }
                    if let Some(genre) = metadata.genre {
                        album.genre = genre;
                    }
                    if let Some(cached) = cache.write().unwrap().album_mut(&album.name) {
                        cached.artist = album.artist.clone();
                        cached.year = album.year.clone();
                        cached.genre = album.genre.clone();
                    }
                    callback(album);
                }
                Err(e) => warn!(album = %album.name, error = %e, "metadata for album failed"),
            }
        }));
    }

    pub fn get_stats(&self, callback: impl FnOnce(ServerStats) + Send + 'static) {
        self.submit(Box::new(move |session| match session.stats() {
            Ok(stats) => callback(stats),
            Err(e) => warn!(error = %e, "stats failed"),
        }));
    }

    pub fn display_type(&self) -> DisplayType {
        *self.display_type.lock().unwrap()
    }

    pub fn albums(&self) -> Vec<Album> {
        self.cache.read().unwrap().albums.clone()
    }

    pub fn genres(&self) -> Vec<Genre> {
        self.cache.read().unwrap().genres.clone()
    }

    pub fn artists(&self) -> Vec<Artist> {
        self.cache.read().unwrap().artists.clone()
    }

    pub fn playlists(&self) -> Vec<Playlist> {
        self.cache.read().unwrap().playlists.clone()
    }

    /// Snapshot of the list the active display type selects.
    pub fn selected_list(&self) -> EntityList {
        let cache = self.cache.read().unwrap();
        match self.display_type() {
            DisplayType::Albums => EntityList::Albums(cache.albums.clone()),
            DisplayType::Genres => EntityList::Genres(cache.genres.clone()),
            DisplayType::Artists => EntityList::Artists(cache.artists.clone()),
            DisplayType::Playlists => EntityList::Playlists(cache.playlists.clone()),
        }
    }
}

impl Drop for MusicSource {
    fn drop(&mut self) {
        self.deinitialize();
    }
}

/// One turn at a time: jobs in submission order, heartbeat ticks on the
/// channel's receive timeout so they serialize with user requests. The
/// loop exits on Shutdown, which doubles as heartbeat cancellation.
fn worker_loop(
    mut session: Box<dyn ProtocolSession>,
    rx: Receiver<Command>,
    heartbeat: Duration,
) {
    let mut next_tick = Instant::now();
    loop {
        let wait = next_tick.saturating_duration_since(Instant::now());
        match rx.recv_timeout(wait) {
            Ok(Command::Run(job)) => job(session.as_mut()),
            Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                // Result discarded; the session publishes its own side effects.
                if let Err(e) = session.status() {
                    debug!(error = %e, "status heartbeat failed");
                }
                next_tick = Instant::now() + heartbeat;
            }
        }
    }
    session.disconnect();
}
