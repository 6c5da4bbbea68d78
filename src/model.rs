//! Library entities cached by the data source and hydrated over time.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which of the four cached top-level lists is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayType {
    #[default]
    Albums,
    Genres,
    Artists,
    Playlists,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Track {
    pub title: String,
    pub artist: String,
    /// File URI relative to the server's music root.
    pub uri: String,
    pub duration: Duration,
    /// 1-based position on the album or playlist.
    pub position: u32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Album {
    pub name: String,
    pub artist: String,
    pub year: String,
    pub genre: String,
    /// Directory of the album inside the server's music root.
    /// `None` until resolved via `get_path_for_album`.
    pub path: Option<String>,
    /// `None` until resolved via `get_tracks_for_albums`.
    pub tracks: Option<Vec<Track>>,
}

impl Album {
    pub fn new(name: &str, artist: &str) -> Self {
        Self {
            name: name.to_string(),
            artist: artist.to_string(),
            ..Default::default()
        }
    }

    /// Stable key addressing this album's thumbnail in the cover cache.
    pub fn cover_cache_key(&self) -> String {
        format!("{:x}", md5::compute(format!("{}-{}", self.artist, self.name)))
    }

    pub fn local_cover_path(&self, cache_dir: &Path) -> PathBuf {
        cache_dir.join(format!("{}.jpg", self.cover_cache_key()))
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Artist {
    pub name: String,
    /// Populated on demand via `get_albums_for_artist`.
    pub albums: Option<Vec<Album>>,
}

impl Artist {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            albums: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Genre {
    pub name: String,
    /// Populated on demand via `get_albums_for_genre`.
    pub albums: Option<Vec<Album>>,
}

impl Genre {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            albums: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Playlist {
    pub name: String,
    /// Populated on demand via `get_tracks_for_playlist`.
    pub tracks: Option<Vec<Track>>,
}

impl Playlist {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tracks: None,
        }
    }
}

/// Snapshot of whichever cached list the active display type selects.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityList {
    Albums(Vec<Album>),
    Genres(Vec<Genre>),
    Artists(Vec<Artist>),
    Playlists(Vec<Playlist>),
}

impl EntityList {
    pub fn len(&self) -> usize {
        match self {
            EntityList::Albums(list) => list.len(),
            EntityList::Genres(list) => list.len(),
            EntityList::Artists(list) => list.len(),
            EntityList::Playlists(list) => list.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Tag values resolved for an album after the initial listing.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AlbumMetadata {
    pub artist: Option<String>,
    pub year: Option<String>,
    pub genre: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    Playing,
    Paused,
    #[default]
    Stopped,
}

/// Snapshot of the server's playback state, refreshed by the heartbeat.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlayerStatus {
    pub state: PlaybackState,
    pub volume: Option<u32>,
    pub elapsed: Option<Duration>,
    pub song_title: Option<String>,
    pub song_artist: Option<String>,
    pub song_album: Option<String>,
}

/// Database statistics reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServerStats {
    pub artists: u32,
    pub albums: u32,
    pub songs: u32,
    pub uptime: Duration,
    pub db_playtime: Duration,
}

/// Entities ordered by name share one comparison rule.
pub trait Named {
    fn name(&self) -> &str;
}

impl Named for Album {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for Artist {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for Genre {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for Playlist {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for Track {
    fn name(&self) -> &str {
        &self.title
    }
}

/// Punctuation ignored at both ends of a name when ordering lists.
const SORT_TRIM_SET: &[char] = &[
    '.', '?', '!', ':', ';', '/', '+', '=', '-', '*', '\'', '"',
];

/// Comparison key for list ordering. The original name is never modified;
/// only the comparison ignores the leading/trailing punctuation.
pub fn sort_key(name: &str) -> &str {
    name.trim_matches(|c| SORT_TRIM_SET.contains(&c))
}

/// Sort ascending by name, case-sensitive apart from the trimmed punctuation.
pub fn sort_by_name<T: Named>(items: &mut [T]) {
    items.sort_by(|a, b| sort_key(a.name()).cmp(sort_key(b.name())));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_key_strips_leading_and_trailing_punctuation() {
        assert_eq!(sort_key("...And Justice for All"), "And Justice for All");
        assert_eq!(sort_key("'Awaken, My Love!'"), "Awaken, My Love");
        assert_eq!(sort_key("Blackstar"), "Blackstar");
        assert_eq!(sort_key("?????"), "");
    }

    #[test]
    fn sort_by_name_ignores_punctuation_but_keeps_originals() {
        let mut albums = vec![
            Album::new("Blackstar", "David Bowie"),
            Album::new("'Awaken, My Love!'", "Childish Gambino"),
            Album::new("...And Justice for All", "Metallica"),
        ];
        sort_by_name(&mut albums);
        let names: Vec<&str> = albums.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["...And Justice for All", "'Awaken, My Love!'", "Blackstar"]
        );
    }

    #[test]
    fn sort_is_case_sensitive_after_trimming() {
        let mut artists = vec![Artist::new("abba"), Artist::new("ABBA")];
        sort_by_name(&mut artists);
        assert_eq!(artists[0].name, "ABBA");
    }

    #[test]
    fn cover_cache_key_is_stable_and_distinct() {
        let a = Album::new("Mezzanine", "Massive Attack");
        let b = Album::new("Mezzanine", "Someone Else");
        assert_eq!(a.cover_cache_key(), a.clone().cover_cache_key());
        assert_ne!(a.cover_cache_key(), b.cover_cache_key());
    }

    #[test]
    fn local_cover_path_uses_cache_key() {
        let album = Album::new("Mezzanine", "Massive Attack");
        let path = album.local_cover_path(Path::new("/tmp/covers"));
        let expected = format!("{}.jpg", album.cover_cache_key());
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), expected);
    }
}
