//! Lifecycle and serialization behaviour of `MusicSource` against a mock
//! protocol session.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use rempd::config::ServerDescriptor;
use rempd::model::{
    Album, AlbumMetadata, Artist, DisplayType, Genre, PlayerStatus, Playlist, ServerStats, Track,
};
use rempd::session::{ProtocolSession, SessionError, SessionFactory, SessionResult};
use rempd::source::{ConnectionState, MusicSource, SourceError};

const SIGNAL_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Default)]
struct MockBehaviour {
    refuse_connect: bool,
    fail_requests: AtomicBool,
    status_calls: AtomicUsize,
}

struct MockFactory {
    behaviour: Arc<MockBehaviour>,
}

impl MockFactory {
    fn new() -> (Self, Arc<MockBehaviour>) {
        let behaviour = Arc::new(MockBehaviour::default());
        (
            Self {
                behaviour: Arc::clone(&behaviour),
            },
            behaviour,
        )
    }

    fn refusing() -> Self {
        Self {
            behaviour: Arc::new(MockBehaviour {
                refuse_connect: true,
                ..Default::default()
            }),
        }
    }
}

impl SessionFactory for MockFactory {
    fn open(&self, _server: &ServerDescriptor) -> Box<dyn ProtocolSession> {
        Box::new(MockSession {
            behaviour: Arc::clone(&self.behaviour),
            connected: false,
        })
    }
}

struct MockSession {
    behaviour: Arc<MockBehaviour>,
    connected: bool,
}

impl MockSession {
    fn check(&self) -> SessionResult<()> {
        if self.behaviour.fail_requests.load(Ordering::SeqCst) {
            Err(SessionError::Protocol("mock request failure".to_string()))
        } else {
            Ok(())
        }
    }
}

impl ProtocolSession for MockSession {
    fn connect(&mut self) -> SessionResult<()> {
        if self.behaviour.refuse_connect {
            return Err(SessionError::Connect("mock refused".to_string()));
        }
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn status(&mut self) -> SessionResult<PlayerStatus> {
        self.behaviour.status_calls.fetch_add(1, Ordering::SeqCst);
        Ok(PlayerStatus::default())
    }

    fn stats(&mut self) -> SessionResult<ServerStats> {
        self.check()?;
        Ok(ServerStats {
            artists: 2,
            albums: 3,
            songs: 30,
            uptime: Duration::from_secs(3600),
            db_playtime: Duration::from_secs(7200),
        })
    }

    fn list_albums(&mut self) -> SessionResult<Vec<Album>> {
        self.check()?;
        Ok(vec![
            Album::new("Blackstar", "David Bowie"),
            Album::new("'Awaken, My Love!'", "Childish Gambino"),
            Album::new("...And Justice for All", "Metallica"),
        ])
    }

    fn list_genres(&mut self) -> SessionResult<Vec<Genre>> {
        self.check()?;
        Ok(vec![Genre::new("Rock"), Genre::new("Funk")])
    }

    fn list_artists(&mut self) -> SessionResult<Vec<Artist>> {
        self.check()?;
        Ok(vec![Artist::new("Metallica"), Artist::new("David Bowie")])
    }

    fn list_playlists(&mut self) -> SessionResult<Vec<Playlist>> {
        self.check()?;
        Ok(vec![Playlist::new("Favourites")])
    }

    fn albums_for_genre(&mut self, genre: &str, first_only: bool) -> SessionResult<Vec<Album>> {
        self.check()?;
        let mut albums = vec![
            Album::new("Blackstar", "David Bowie"),
            Album::new("...And Justice for All", "Metallica"),
        ];
        albums.retain(|_| genre == "Rock");
        if first_only {
            albums.truncate(1);
        }
        Ok(albums)
    }

    fn albums_for_artist(&mut self, artist: &str) -> SessionResult<Vec<Album>> {
        self.check()?;
        Ok(vec![
            Album::new("...And Justice for All", artist),
            Album::new("Blackstar", artist),
        ])
    }

    fn artists_for_genre(&mut self, _genre: &str) -> SessionResult<Vec<Artist>> {
        self.check()?;
        Ok(vec![Artist::new("Metallica"), Artist::new("'Bowie'")])
    }

    fn path_for_album(&mut self, album: &Album) -> SessionResult<String> {
        self.check()?;
        Ok(format!("music/{}", album.name))
    }

    fn tracks_for_album(&mut self, album: &Album) -> SessionResult<Vec<Track>> {
        self.check()?;
        Ok(vec![Track {
            title: format!("{} track", album.name),
            artist: album.artist.clone(),
            uri: format!("music/{}/01.flac", album.name),
            duration: Duration::from_secs(240),
            position: 1,
        }])
    }

    fn tracks_for_playlist(&mut self, playlist: &str) -> SessionResult<Vec<Track>> {
        self.check()?;
        Ok(vec![Track {
            title: format!("{} opener", playlist),
            ..Default::default()
        }])
    }

    fn metadata_for_album(&mut self, _album: &Album) -> SessionResult<AlbumMetadata> {
        self.check()?;
        Ok(AlbumMetadata {
            artist: Some("David Bowie".to_string()),
            year: Some("2016".to_string()),
            genre: Some("Art Rock".to_string()),
        })
    }
}

fn connected_source() -> (MusicSource, Arc<MockBehaviour>) {
    let (factory, behaviour) = MockFactory::new();
    let source = MusicSource::with_heartbeat(factory, Duration::from_millis(25));
    source
        .set_server(ServerDescriptor::new("localhost", 6600))
        .expect("mock connect");
    (source, behaviour)
}

#[test]
fn initialize_without_server_fails() {
    let (factory, _) = MockFactory::new();
    let source = MusicSource::new(factory);
    assert!(matches!(
        source.initialize(),
        Err(SourceError::NoServerConfigured)
    ));
    assert_eq!(source.state(), ConnectionState::Disconnected);
}

#[test]
fn connect_failure_surfaces_diagnostic_and_stays_disconnected() {
    let source = MusicSource::new(MockFactory::refusing());
    let err = source
        .set_server(ServerDescriptor::new("localhost", 6600))
        .unwrap_err();
    match err {
        SourceError::ConnectFailed(msg) => assert!(msg.contains("mock refused")),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(source.state(), ConnectionState::Disconnected);
}

#[test]
fn initialize_is_idempotent_when_connected() {
    let (source, _) = connected_source();
    assert!(source.initialize().is_ok());
    assert_eq!(source.state(), ConnectionState::Connected);
}

#[test]
fn list_fetch_sorts_ignoring_punctuation_and_keeps_names() {
    let (source, _) = connected_source();
    let (tx, rx) = mpsc::channel();
    source.get_list_for_display_type(DisplayType::Albums, move || {
        let _ = tx.send(());
    });
    rx.recv_timeout(SIGNAL_TIMEOUT).expect("list signal");

    let names: Vec<String> = source.albums().iter().map(|a| a.name.clone()).collect();
    assert_eq!(
        names,
        vec!["...And Justice for All", "'Awaken, My Love!'", "Blackstar"]
    );
    assert_eq!(source.display_type(), DisplayType::Albums);
    assert_eq!(source.selected_list().len(), 3);
}

#[test]
fn requests_while_disconnected_never_signal() {
    let (factory, _) = MockFactory::new();
    let source = MusicSource::new(factory);
    let (tx, rx) = mpsc::channel();
    source.get_list_for_display_type(DisplayType::Albums, move || {
        let _ = tx.send(());
    });
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    assert!(source.albums().is_empty());
}

#[test]
fn failed_list_fetch_leaves_cache_untouched_and_never_signals() {
    let (source, behaviour) = connected_source();

    let (tx, rx) = mpsc::channel();
    source.get_list_for_display_type(DisplayType::Albums, move || {
        let _ = tx.send(());
    });
    rx.recv_timeout(SIGNAL_TIMEOUT).expect("first fetch");
    let before = source.albums();
    assert_eq!(before.len(), 3);

    behaviour.fail_requests.store(true, Ordering::SeqCst);
    let (tx, rx) = mpsc::channel();
    source.get_list_for_display_type(DisplayType::Albums, move || {
        let _ = tx.send(());
    });
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    assert_eq!(source.albums(), before);
}

#[test]
fn tracks_for_albums_signals_once_per_album_in_order() {
    let (source, _) = connected_source();
    let albums = vec![
        Album::new("First", "A"),
        Album::new("Second", "B"),
        Album::new("Third", "C"),
    ];
    let (tx, rx) = mpsc::channel();
    source.get_tracks_for_albums(albums, move |album| {
        let _ = tx.send(album.name.clone());
    });

    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(rx.recv_timeout(SIGNAL_TIMEOUT).expect("per-album signal"));
    }
    assert_eq!(seen, vec!["First", "Second", "Third"]);
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn dependent_resolutions_hydrate_cache_and_callbacks() {
    let (source, _) = connected_source();

    let (tx, rx) = mpsc::channel();
    source.get_list_for_display_type(DisplayType::Albums, move || {
        let _ = tx.send(());
    });
    rx.recv_timeout(SIGNAL_TIMEOUT).expect("list signal");

    let album = source
        .albums()
        .into_iter()
        .find(|a| a.name == "Blackstar")
        .unwrap();
    assert_eq!(album.path, None);

    let (tx, rx) = mpsc::channel();
    source.get_path_for_album(&album, move |resolved| {
        let _ = tx.send(resolved);
    });
    let resolved = rx.recv_timeout(SIGNAL_TIMEOUT).expect("path signal");
    assert_eq!(resolved.path.as_deref(), Some("music/Blackstar"));

    let cached = source
        .albums()
        .into_iter()
        .find(|a| a.name == "Blackstar")
        .unwrap();
    assert_eq!(cached.path.as_deref(), Some("music/Blackstar"));

    let (tx, rx) = mpsc::channel();
    source.get_metadata_for_album(&resolved, move |hydrated| {
        let _ = tx.send(hydrated);
    });
    let hydrated = rx.recv_timeout(SIGNAL_TIMEOUT).expect("metadata signal");
    assert_eq!(hydrated.year, "2016");
    assert_eq!(hydrated.genre, "Art Rock");
}

#[test]
fn artists_for_genre_passes_sorted_snapshot() {
    let (source, _) = connected_source();
    let (tx, rx) = mpsc::channel();
    source.get_artists_for_genre(&Genre::new("Rock"), move |artists| {
        let _ = tx.send(artists);
    });
    let artists = rx.recv_timeout(SIGNAL_TIMEOUT).expect("artists signal");
    let names: Vec<&str> = artists.iter().map(|a| a.name.as_str()).collect();
    // 'Bowie' sorts by its trimmed key but keeps its quotes.
    assert_eq!(names, vec!["'Bowie'", "Metallica"]);
}

#[test]
fn stats_reach_the_callback() {
    let (source, _) = connected_source();
    let (tx, rx) = mpsc::channel();
    source.get_stats(move |stats| {
        let _ = tx.send(stats);
    });
    let stats = rx.recv_timeout(SIGNAL_TIMEOUT).expect("stats signal");
    assert_eq!(stats.albums, 3);
    assert_eq!(stats.songs, 30);
}

#[test]
fn heartbeat_ticks_immediately_and_repeats() {
    let (source, behaviour) = connected_source();
    std::thread::sleep(Duration::from_millis(90));
    let calls = behaviour.status_calls.load(Ordering::SeqCst);
    assert!(calls >= 2, "expected immediate tick plus repeats, got {calls}");
    source.deinitialize();
}

#[test]
fn deinitialize_stops_heartbeat_and_is_idempotent() {
    let (source, behaviour) = connected_source();
    std::thread::sleep(Duration::from_millis(40));
    source.deinitialize();
    source.deinitialize();
    assert_eq!(source.state(), ConnectionState::Disconnected);

    let after_teardown = behaviour.status_calls.load(Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(90));
    assert_eq!(behaviour.status_calls.load(Ordering::SeqCst), after_teardown);
}

#[test]
fn reinitialize_matches_fresh_initialize() {
    let (source, _) = connected_source();
    source.reinitialize().expect("reinitialize");
    assert_eq!(source.state(), ConnectionState::Connected);

    // The reconnected worker still serves requests.
    let (tx, rx) = mpsc::channel();
    source.get_list_for_display_type(DisplayType::Genres, move || {
        let _ = tx.send(());
    });
    rx.recv_timeout(SIGNAL_TIMEOUT).expect("list after reinit");
    assert_eq!(source.genres().len(), 2);
}

#[test]
fn suspend_and_resume_follow_process_lifecycle() {
    let (source, _) = connected_source();
    source.suspend();
    assert_eq!(source.state(), ConnectionState::Disconnected);
    source.resume().expect("resume");
    assert_eq!(source.state(), ConnectionState::Connected);
}
