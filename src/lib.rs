//! Data and cover-art synchronization core for MPD remote clients.
//!
//! Two independent concurrency domains live here. [`source::MusicSource`]
//! owns the protocol session and funnels every request through one serial
//! worker, so the stateful connection never sees overlapping commands.
//! [`cover::CoverFetcher`] runs one cancellable task per album that
//! downloads, crops and disk-caches artwork from a companion web server.
//!
//! View code is a consumer of this crate, not part of it: it submits
//! operations, receives completion callbacks with owned snapshots, and
//! reads the cached lists between worker turns.

pub mod config;
pub mod cover;
pub mod logging;
pub mod model;
pub mod session;
pub mod source;

#[cfg(feature = "mpd")]
pub mod mpd_session;

pub use config::{ConfigError, CoverServerConfig, ServerDescriptor, Settings};
pub use cover::{CoverFetcher, CoverHandle, CoverTaskState, NetworkActivity};
pub use model::{
    Album, AlbumMetadata, Artist, DisplayType, EntityList, Genre, PlaybackState, PlayerStatus,
    Playlist, ServerStats, Track,
};
pub use session::{ProtocolSession, SessionError, SessionFactory};
pub use source::{ConnectionState, MusicSource, SourceError, DEFAULT_HEARTBEAT};

#[cfg(feature = "mpd")]
pub use mpd_session::{MpdSession, MpdSessionFactory};
