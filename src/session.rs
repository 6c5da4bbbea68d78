//! Contract between the data source and a concrete music-server protocol.

use thiserror::Error;

use crate::config::ServerDescriptor;
use crate::model::{
    Album, AlbumMetadata, Artist, Genre, PlayerStatus, Playlist, ServerStats, Track,
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("not connected")]
    NotConnected,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("request cancelled")]
    Cancelled,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// A stateful connection to the music server.
///
/// Every call is synchronous from the serial worker's point of view: it
/// blocks the worker's turn until the server answers, and the worker
/// guarantees no two requests ever overlap on one session. All read
/// requests must be safe to retry; a `connect` interrupted from outside
/// must surface as an `Err`, never as a panic.
pub trait ProtocolSession: Send {
    fn connect(&mut self) -> SessionResult<()>;
    fn disconnect(&mut self);
    fn is_connected(&self) -> bool;

    fn status(&mut self) -> SessionResult<PlayerStatus>;
    fn stats(&mut self) -> SessionResult<ServerStats>;

    fn list_albums(&mut self) -> SessionResult<Vec<Album>>;
    fn list_genres(&mut self) -> SessionResult<Vec<Genre>>;
    fn list_artists(&mut self) -> SessionResult<Vec<Artist>>;
    fn list_playlists(&mut self) -> SessionResult<Vec<Playlist>>;

    fn albums_for_genre(&mut self, genre: &str, first_only: bool) -> SessionResult<Vec<Album>>;
    fn albums_for_artist(&mut self, artist: &str) -> SessionResult<Vec<Album>>;
    fn artists_for_genre(&mut self, genre: &str) -> SessionResult<Vec<Artist>>;
    fn path_for_album(&mut self, album: &Album) -> SessionResult<String>;
    fn tracks_for_album(&mut self, album: &Album) -> SessionResult<Vec<Track>>;
    fn tracks_for_playlist(&mut self, playlist: &str) -> SessionResult<Vec<Track>>;
    fn metadata_for_album(&mut self, album: &Album) -> SessionResult<AlbumMetadata>;
}

/// Opens sessions against a given server. Injected into the data source so
/// backends and tests can swap the transport.
pub trait SessionFactory: Send + Sync {
    fn open(&self, server: &ServerDescriptor) -> Box<dyn ProtocolSession>;
}
