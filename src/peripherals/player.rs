//! Audio player and content library.
//!
//! [`LibraryPlayer`] scans one folder per [`ContentCategory`] and hands out
//! items round-robin. It does not decode audio: playback is tracked against
//! the injected clock using a duration estimated from the file size, which is
//! enough to drive the scheduler on hosts without an audio backend.

use crate::clock::Clock;
use crate::config::MusicConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Supported content file extensions.
pub const AUDIO_EXTENSIONS: [&str; 4] = ["mp3", "wav", "ogg", "flac"];

const MIN_ESTIMATED_DURATION: Duration = Duration::from_secs(60);
const BYTES_PER_ESTIMATED_SECOND: u64 = 1024 * 1024;

/// Content bucket chosen from a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentCategory {
    StressRelief,
    Calming,
}

impl ContentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentCategory::StressRelief => "stress_relief",
            ContentCategory::Calming => "calming",
        }
    }
}

impl std::fmt::Display for ContentCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A playable item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentHandle {
    pub path: PathBuf,
    pub title: String,
    pub category: ContentCategory,
    /// Known or estimated length, if any
    pub duration: Option<Duration>,
}

impl ContentHandle {
    pub fn new(path: impl Into<PathBuf>, category: ContentCategory) -> Self {
        let path = path.into();
        let title = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path,
            title,
            category,
            duration: None,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }
}

/// Player errors.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("No content available for category {0}")]
    NoContent(ContentCategory),
    #[error("Content file missing: {0}")]
    Missing(PathBuf),
    #[error("Playback failed: {0}")]
    Playback(String),
}

/// Plays one item at a time.
pub trait Player: Send {
    /// Pick the next item for `category`.
    fn select(&mut self, category: ContentCategory) -> Option<ContentHandle>;

    /// Start playing `handle`, replacing whatever is playing.
    fn play(&mut self, handle: &ContentHandle) -> Result<(), PlayerError>;

    fn is_playing(&self) -> bool;

    /// Length of the current item, if known.
    fn duration(&self) -> Option<Duration>;

    /// Stop playback. Calling this while nothing plays is a no-op.
    fn stop(&mut self);
}

#[derive(Debug)]
struct Playing {
    handle: ContentHandle,
    started_at: DateTime<Utc>,
}

/// Folder-backed player with clock-tracked playback.
pub struct LibraryPlayer {
    library: Vec<(ContentCategory, Vec<ContentHandle>)>,
    cursors: [usize; 2],
    current: Option<Playing>,
    clock: Arc<dyn Clock>,
}

impl LibraryPlayer {
    /// Scan the configured folders. Missing folders yield empty categories.
    pub fn scan(music: &MusicConfig, clock: Arc<dyn Clock>) -> Self {
        let library = vec![
            (
                ContentCategory::StressRelief,
                scan_folder(&music.stress_relief, ContentCategory::StressRelief),
            ),
            (
                ContentCategory::Calming,
                scan_folder(&music.calming, ContentCategory::Calming),
            ),
        ];

        for (category, items) in &library {
            tracing::info!("Loaded {} {} items", items.len(), category);
        }

        Self::from_library(library, clock)
    }

    /// Build a player over an explicit item list.
    pub fn from_library(
        library: Vec<(ContentCategory, Vec<ContentHandle>)>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            library,
            cursors: [0; 2],
            current: None,
            clock,
        }
    }

    /// Number of items available for `category`.
    pub fn item_count(&self, category: ContentCategory) -> usize {
        self.items(category).map_or(0, |items| items.len())
    }

    /// The item currently playing.
    pub fn current(&self) -> Option<&ContentHandle> {
        self.current.as_ref().map(|p| &p.handle)
    }

    fn items(&self, category: ContentCategory) -> Option<&Vec<ContentHandle>> {
        self.library
            .iter()
            .find(|(c, _)| *c == category)
            .map(|(_, items)| items)
    }
}

fn cursor_index(category: ContentCategory) -> usize {
    match category {
        ContentCategory::StressRelief => 0,
        ContentCategory::Calming => 1,
    }
}

impl Player for LibraryPlayer {
    fn select(&mut self, category: ContentCategory) -> Option<ContentHandle> {
        let index = cursor_index(category);
        let cursor = self.cursors[index];
        let items = self.items(category)?;
        if items.is_empty() {
            return None;
        }
        let handle = items[cursor % items.len()].clone();
        self.cursors[index] = cursor.wrapping_add(1);
        Some(handle)
    }

    fn play(&mut self, handle: &ContentHandle) -> Result<(), PlayerError> {
        if !handle.path.as_os_str().is_empty() && !handle.path.exists() {
            return Err(PlayerError::Missing(handle.path.clone()));
        }

        self.stop();
        tracing::info!("Playing {} ({})", handle.title, handle.category);
        self.current = Some(Playing {
            handle: handle.clone(),
            started_at: self.clock.now(),
        });
        Ok(())
    }

    fn is_playing(&self) -> bool {
        match &self.current {
            Some(playing) => match playing.handle.duration {
                Some(duration) => self.clock.elapsed_since(playing.started_at) < duration,
                None => true,
            },
            None => false,
        }
    }

    fn duration(&self) -> Option<Duration> {
        self.current.as_ref().and_then(|p| p.handle.duration)
    }

    fn stop(&mut self) {
        if let Some(playing) = self.current.take() {
            tracing::debug!("Stopped {}", playing.handle.title);
        }
    }
}

fn scan_folder(folder: &Path, category: ContentCategory) -> Vec<ContentHandle> {
    let entries = match std::fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Cannot read music folder {}: {}", folder.display(), e);
            return Vec::new();
        }
    };

    let mut items: Vec<ContentHandle> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| is_audio_file(&entry.path()))
        .map(|entry| {
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            ContentHandle::new(entry.path(), category).with_duration(estimate_duration(size))
        })
        .collect();

    items.sort_by(|a, b| a.path.cmp(&b.path));
    items
}

fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            AUDIO_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// Rough length from file size, never shorter than one minute.
pub fn estimate_duration(size_bytes: u64) -> Duration {
    Duration::from_secs(size_bytes / BYTES_PER_ESTIMATED_SECOND).max(MIN_ESTIMATED_DURATION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn handle(name: &str, category: ContentCategory, secs: u64) -> ContentHandle {
        ContentHandle {
            path: PathBuf::new(),
            title: name.to_string(),
            category,
            duration: Some(Duration::from_secs(secs)),
        }
    }

    #[test]
    fn test_select_round_robin() {
        let clock = Arc::new(ManualClock::default());
        let mut player = LibraryPlayer::from_library(
            vec![(
                ContentCategory::Calming,
                vec![
                    handle("a", ContentCategory::Calming, 90),
                    handle("b", ContentCategory::Calming, 90),
                ],
            )],
            clock,
        );

        let titles: Vec<String> = (0..3)
            .filter_map(|_| player.select(ContentCategory::Calming))
            .map(|h| h.title)
            .collect();
        assert_eq!(titles, vec!["a", "b", "a"]);
        assert!(player.select(ContentCategory::StressRelief).is_none());
    }

    #[test]
    fn test_playback_ends_after_duration() {
        let clock = Arc::new(ManualClock::default());
        let mut player = LibraryPlayer::from_library(
            vec![(
                ContentCategory::StressRelief,
                vec![handle("song", ContentCategory::StressRelief, 90)],
            )],
            clock.clone(),
        );

        let item = player.select(ContentCategory::StressRelief).unwrap();
        player.play(&item).unwrap();
        assert!(player.is_playing());
        assert_eq!(player.duration(), Some(Duration::from_secs(90)));

        clock.advance(Duration::from_secs(89));
        assert!(player.is_playing());
        clock.advance(Duration::from_secs(1));
        assert!(!player.is_playing());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let clock = Arc::new(ManualClock::default());
        let mut player = LibraryPlayer::from_library(Vec::new(), clock);
        player.stop();
        player.stop();
        assert!(!player.is_playing());
    }

    #[test]
    fn test_play_missing_file_fails() {
        let clock = Arc::new(ManualClock::default());
        let mut player = LibraryPlayer::from_library(Vec::new(), clock);
        let missing = ContentHandle::new("/nonexistent/track.mp3", ContentCategory::Calming);
        assert!(matches!(player.play(&missing), Err(PlayerError::Missing(_))));
    }

    #[test]
    fn test_scan_folder_filters_extensions() {
        let dir = std::env::temp_dir().join(format!("mtb-scan-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("b.mp3"), b"x").unwrap();
        std::fs::write(dir.join("a.WAV"), b"x").unwrap();
        std::fs::write(dir.join("notes.txt"), b"x").unwrap();

        let items = scan_folder(&dir, ContentCategory::Calming);
        let titles: Vec<&str> = items.iter().map(|h| h.title.as_str()).collect();
        assert_eq!(titles, vec!["a", "b"]);
        assert_eq!(items[0].duration, Some(Duration::from_secs(60)));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_estimate_duration() {
        assert_eq!(estimate_duration(0), Duration::from_secs(60));
        assert_eq!(estimate_duration(180 * 1024 * 1024), Duration::from_secs(180));
    }
}
