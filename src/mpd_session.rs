//! MPD backend for the session contract, built on the `mpd` crate.
//!
//! The library listing commands derive everything from `listall`, folding
//! songs into albums/artists/genres by tag. Album paths stay unresolved
//! until asked for, matching the lazy hydration contract.

use std::collections::BTreeMap;
use std::path::Path;

use mpd::{Client, Song, State};
use tokio::sync::watch;
use tracing::debug;

use crate::config::ServerDescriptor;
use crate::model::{
    Album, AlbumMetadata, Artist, Genre, PlaybackState, PlayerStatus, Playlist, ServerStats,
    Track,
};
use crate::session::{ProtocolSession, SessionError, SessionFactory, SessionResult};

/// Opens [`MpdSession`]s and hands out playback-status subscriptions.
///
/// Every status request a session answers (heartbeats included) is also
/// published on the watch channel, so observers track playback without
/// touching the serial worker.
pub struct MpdSessionFactory {
    status_tx: watch::Sender<Option<PlayerStatus>>,
}

impl MpdSessionFactory {
    pub fn new() -> Self {
        let (status_tx, _) = watch::channel(None);
        Self { status_tx }
    }

    pub fn watch_status(&self) -> watch::Receiver<Option<PlayerStatus>> {
        self.status_tx.subscribe()
    }
}

impl Default for MpdSessionFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionFactory for MpdSessionFactory {
    fn open(&self, server: &ServerDescriptor) -> Box<dyn ProtocolSession> {
        Box::new(MpdSession {
            server: server.clone(),
            conn: None,
            status_tx: self.status_tx.clone(),
        })
    }
}

pub struct MpdSession {
    server: ServerDescriptor,
    conn: Option<Client>,
    status_tx: watch::Sender<Option<PlayerStatus>>,
}

impl MpdSession {
    fn conn(&mut self) -> Result<&mut Client, SessionError> {
        self.conn.as_mut().ok_or(SessionError::NotConnected)
    }

    fn all_songs(&mut self) -> SessionResult<Vec<Song>> {
        self.conn()?
            .listall()
            .map_err(|e| SessionError::Protocol(e.to_string()))
    }
}

impl ProtocolSession for MpdSession {
    fn connect(&mut self) -> SessionResult<()> {
        let addr = self.server.addr();
        let mut conn =
            Client::connect(&addr).map_err(|e| SessionError::Connect(e.to_string()))?;
        if let Some(password) = &self.server.password {
            conn.login(password)
                .map_err(|e| SessionError::Connect(e.to_string()))?;
        }
        self.conn = Some(conn);
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.conn.take().is_some() {
            debug!(server = %self.server.addr(), "mpd session closed");
        }
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    fn status(&mut self) -> SessionResult<PlayerStatus> {
        let conn = self.conn()?;
        let status = conn
            .status()
            .map_err(|e| SessionError::Protocol(e.to_string()))?;
        let song = conn
            .currentsong()
            .map_err(|e| SessionError::Protocol(e.to_string()))?;

        let state = match status.state {
            State::Play => PlaybackState::Playing,
            State::Pause => PlaybackState::Paused,
            State::Stop => PlaybackState::Stopped,
        };
        let snapshot = PlayerStatus {
            state,
            volume: if status.volume >= 0 {
                Some(status.volume as u32)
            } else {
                None
            },
            elapsed: status.elapsed,
            song_title: song.as_ref().and_then(|s| s.title.clone()),
            song_artist: song.as_ref().and_then(|s| s.artist.clone()),
            song_album: song.as_ref().and_then(|s| song_album(s)),
        };
        self.status_tx.send_replace(Some(snapshot.clone()));
        Ok(snapshot)
    }

    fn stats(&mut self) -> SessionResult<ServerStats> {
        let stats = self
            .conn()?
            .stats()
            .map_err(|e| SessionError::Protocol(e.to_string()))?;
        Ok(ServerStats {
            artists: stats.artists,
            albums: stats.albums,
            songs: stats.songs,
            uptime: stats.uptime,
            db_playtime: stats.db_playtime,
        })
    }

    fn list_albums(&mut self) -> SessionResult<Vec<Album>> {
        let songs = self.all_songs()?;
        Ok(fold_albums(songs.iter()))
    }

    fn list_genres(&mut self) -> SessionResult<Vec<Genre>> {
        let songs = self.all_songs()?;
        let mut names: Vec<String> = songs
            .iter()
            .filter_map(|s| find_tag(s, "Genre"))
            .collect();
        names.sort();
        names.dedup();
        Ok(names.iter().map(|n| Genre::new(n)).collect())
    }

    fn list_artists(&mut self) -> SessionResult<Vec<Artist>> {
        let songs = self.all_songs()?;
        let mut names: Vec<String> = songs.iter().filter_map(song_artist).collect();
        names.sort();
        names.dedup();
        Ok(names.iter().map(|n| Artist::new(n)).collect())
    }

    fn list_playlists(&mut self) -> SessionResult<Vec<Playlist>> {
        let playlists = self
            .conn()?
            .playlists()
            .map_err(|e| SessionError::Protocol(e.to_string()))?;
        Ok(playlists.iter().map(|p| Playlist::new(&p.name)).collect())
    }

    fn albums_for_genre(&mut self, genre: &str, first_only: bool) -> SessionResult<Vec<Album>> {
        let songs = self.all_songs()?;
        let mut albums = fold_albums(
            songs
                .iter()
                .filter(|s| find_tag(s, "Genre").as_deref() == Some(genre)),
        );
        if first_only {
            albums.truncate(1);
        }
        Ok(albums)
    }

    fn albums_for_artist(&mut self, artist: &str) -> SessionResult<Vec<Album>> {
        let songs = self.all_songs()?;
        Ok(fold_albums(
            songs
                .iter()
                .filter(|s| song_artist(s).as_deref() == Some(artist)),
        ))
    }

    fn artists_for_genre(&mut self, genre: &str) -> SessionResult<Vec<Artist>> {
        let songs = self.all_songs()?;
        let mut names: Vec<String> = songs
            .iter()
            .filter(|s| find_tag(s, "Genre").as_deref() == Some(genre))
            .filter_map(song_artist)
            .collect();
        names.sort();
        names.dedup();
        Ok(names.iter().map(|n| Artist::new(n)).collect())
    }

    fn path_for_album(&mut self, album: &Album) -> SessionResult<String> {
        let songs = self.all_songs()?;
        songs
            .iter()
            .find(|s| song_album(s).as_deref() == Some(album.name.as_str()))
            .and_then(|s| {
                Path::new(&s.file)
                    .parent()
                    .map(|p| p.to_string_lossy().into_owned())
            })
            .ok_or_else(|| SessionError::Protocol(format!("no songs for album {}", album.name)))
    }

    fn tracks_for_album(&mut self, album: &Album) -> SessionResult<Vec<Track>> {
        let songs = self.all_songs()?;
        Ok(songs
            .iter()
            .filter(|s| song_album(s).as_deref() == Some(album.name.as_str()))
            .enumerate()
            .map(|(i, s)| song_to_track(s, i))
            .collect())
    }

    fn tracks_for_playlist(&mut self, playlist: &str) -> SessionResult<Vec<Track>> {
        let songs = self
            .conn()?
            .playlist(playlist)
            .map_err(|e| SessionError::Protocol(e.to_string()))?;
        Ok(songs
            .iter()
            .enumerate()
            .map(|(i, s)| song_to_track(s, i))
            .collect())
    }

    fn metadata_for_album(&mut self, album: &Album) -> SessionResult<AlbumMetadata> {
        let songs = self.all_songs()?;
        let song = songs
            .iter()
            .find(|s| song_album(s).as_deref() == Some(album.name.as_str()))
            .ok_or_else(|| {
                SessionError::Protocol(format!("no songs for album {}", album.name))
            })?;
        Ok(AlbumMetadata {
            artist: song_artist(song),
            year: find_tag(song, "Date"),
            genre: find_tag(song, "Genre"),
        })
    }
}

/// Tag lookup, case-insensitive on the key.
fn find_tag(song: &Song, key: &str) -> Option<String> {
    song.tags
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.clone())
}

fn song_album(song: &Song) -> Option<String> {
    find_tag(song, "Album")
}

fn song_artist(song: &Song) -> Option<String> {
    find_tag(song, "AlbumArtist")
        .or_else(|| song.artist.clone())
        .or_else(|| find_tag(song, "Artist"))
}

fn song_to_track(song: &Song, index: usize) -> Track {
    let position = find_tag(song, "Track")
        .and_then(|t| t.split('/').next().and_then(|n| n.parse().ok()))
        .unwrap_or((index + 1) as u32);
    Track {
        title: song
            .title
            .clone()
            .or_else(|| find_tag(song, "Title"))
            .unwrap_or_else(|| song.file.clone()),
        artist: song_artist(song).unwrap_or_default(),
        uri: song.file.clone(),
        duration: song.duration.unwrap_or_default(),
        position,
    }
}

/// Fold songs into unique albums keyed by album tag, picking up artist,
/// genre and year from the first song that carries each.
fn fold_albums<'a>(songs: impl Iterator<Item = &'a Song>) -> Vec<Album> {
    let mut albums: BTreeMap<String, Album> = BTreeMap::new();
    for song in songs {
        let Some(name) = song_album(song) else {
            continue;
        };
        let album = albums
            .entry(name.clone())
            .or_insert_with(|| Album::new(&name, ""));
        if album.artist.is_empty() {
            if let Some(artist) = song_artist(song) {
                album.artist = artist;
            }
        }
        if album.genre.is_empty() {
            if let Some(genre) = find_tag(song, "Genre") {
                album.genre = genre;
            }
        }
        if album.year.is_empty() {
            if let Some(year) = find_tag(song, "Date") {
                album.year = year;
            }
        }
    }
    albums.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song(file: &str, tags: &[(&str, &str)]) -> Song {
        Song {
            file: file.to_string(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn fold_albums_collects_tags_from_first_carrier() {
        let songs = vec![
            song("music/bowie/blackstar/01.flac", &[("Album", "Blackstar")]),
            song(
                "music/bowie/blackstar/02.flac",
                &[
                    ("Album", "Blackstar"),
                    ("Artist", "David Bowie"),
                    ("Genre", "Art Rock"),
                    ("Date", "2016"),
                ],
            ),
        ];
        let albums = fold_albums(songs.iter());
        assert_eq!(albums.len(), 1);
        assert_eq!(albums[0].name, "Blackstar");
        assert_eq!(albums[0].artist, "David Bowie");
        assert_eq!(albums[0].genre, "Art Rock");
        assert_eq!(albums[0].year, "2016");
        assert_eq!(albums[0].path, None);
    }

    #[test]
    fn song_to_track_prefers_track_tag_over_index() {
        let s = song(
            "music/a/b/07.flac",
            &[("Title", "Lazarus"), ("Track", "7/10")],
        );
        let track = song_to_track(&s, 0);
        assert_eq!(track.title, "Lazarus");
        assert_eq!(track.position, 7);

        let untagged = song("music/a/b/x.flac", &[]);
        assert_eq!(song_to_track(&untagged, 2).position, 3);
        assert_eq!(song_to_track(&untagged, 2).title, "music/a/b/x.flac");
    }

    #[test]
    fn find_tag_is_case_insensitive() {
        let s = song("f.flac", &[("genre", "Jazz")]);
        assert_eq!(find_tag(&s, "Genre").as_deref(), Some("Jazz"));
    }
}
