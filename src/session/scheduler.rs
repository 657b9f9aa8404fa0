//! Content selection and the mid-playback re-evaluation trigger.

use crate::clock::Clock;
use crate::core::{StressLabel, StressPrediction};
use crate::peripherals::{ContentCategory, ContentHandle, Player, PlayerError};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Items tried before giving up on a category for this cycle.
const MAX_PLAY_ATTEMPTS: usize = 3;

/// Category played for a prediction.
pub fn category_for(label: StressLabel) -> ContentCategory {
    match label {
        StressLabel::Stress => ContentCategory::StressRelief,
        StressLabel::NoStress => ContentCategory::Calming,
    }
}

/// Display text announcing a prediction and the music it selects.
pub fn prediction_message(prediction: &StressPrediction) -> String {
    match prediction.label {
        StressLabel::Stress => format!(
            "Stress detected ({:.1})\nPlaying relief music",
            prediction.confidence
        ),
        StressLabel::NoStress => format!(
            "Relaxed state ({:.1})\nPlaying calming music",
            prediction.confidence
        ),
    }
}

/// One-shot trigger measured from the start of the current item.
///
/// Armed only for items longer than the lead time, it fires once at
/// `duration - lead` and then stays disarmed until re-armed.
#[derive(Debug, Clone)]
pub struct ReEvaluationTimer {
    lead: Duration,
    fire_at: Option<Duration>,
}

impl ReEvaluationTimer {
    pub fn new(lead: Duration) -> Self {
        Self {
            lead,
            fire_at: None,
        }
    }

    /// Arm for an item of the given length. Returns whether the timer armed.
    pub fn arm(&mut self, item_duration: Option<Duration>) -> bool {
        self.fire_at = item_duration
            .filter(|d| *d > self.lead)
            .map(|d| d - self.lead);
        self.fire_at.is_some()
    }

    /// Fire if `elapsed` has reached the trigger point.
    pub fn poll(&mut self, elapsed: Duration) -> bool {
        match self.fire_at {
            Some(at) if elapsed >= at => {
                self.fire_at = None;
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&mut self) {
        self.fire_at = None;
    }

    pub fn is_armed(&self) -> bool {
        self.fire_at.is_some()
    }

    /// Offset from item start at which the timer fires.
    pub fn fire_at(&self) -> Option<Duration> {
        self.fire_at
    }
}

/// The item currently scheduled.
#[derive(Debug, Clone)]
pub struct PlaybackItem {
    pub handle: ContentHandle,
    pub prediction: StressPrediction,
    pub started_at: DateTime<Utc>,
    pub duration: Option<Duration>,
}

/// Picks content for a prediction and tracks the re-evaluation point.
#[derive(Debug)]
pub struct PlaybackScheduler {
    timer: ReEvaluationTimer,
    current: Option<PlaybackItem>,
}

impl PlaybackScheduler {
    pub fn new(reevaluation_lead: Duration) -> Self {
        Self {
            timer: ReEvaluationTimer::new(reevaluation_lead),
            current: None,
        }
    }

    /// Start an item matching `prediction`.
    ///
    /// An item that fails to play is skipped in favour of the next one in the
    /// same category.
    pub fn start(
        &mut self,
        prediction: StressPrediction,
        player: &mut dyn Player,
        clock: &dyn Clock,
    ) -> Result<&PlaybackItem, PlayerError> {
        self.cancel();
        let category = category_for(prediction.label);

        let mut last_error = PlayerError::NoContent(category);
        for _ in 0..MAX_PLAY_ATTEMPTS {
            let Some(handle) = player.select(category) else {
                break;
            };

            if let Err(e) = player.play(&handle) {
                tracing::warn!("Skipping {}: {}", handle.title, e);
                last_error = e;
                continue;
            }

            let duration = player.duration().or(handle.duration);
            if self.timer.arm(duration) {
                tracing::debug!(
                    "Re-evaluation armed at {:?} into {}",
                    self.timer.fire_at().unwrap_or_default(),
                    handle.title
                );
            }

            tracing::info!(
                "Now playing {} ({}, {})",
                handle.title,
                category,
                duration
                    .map(|d| format!("{}s", d.as_secs()))
                    .unwrap_or_else(|| "unknown length".to_string())
            );

            return Ok(self.current.insert(PlaybackItem {
                handle,
                prediction,
                started_at: clock.now(),
                duration,
            }));
        }

        Err(last_error)
    }

    /// Whether the re-evaluation point of the current item has been reached.
    /// Fires at most once per item.
    pub fn due_for_reevaluation(&mut self, clock: &dyn Clock) -> bool {
        match &self.current {
            Some(item) => self.timer.poll(clock.elapsed_since(item.started_at)),
            None => false,
        }
    }

    /// Forget the current item and disarm the timer.
    pub fn cancel(&mut self) {
        self.timer.cancel();
        self.current = None;
    }

    pub fn current(&self) -> Option<&PlaybackItem> {
        self.current.as_ref()
    }

    pub fn is_reevaluation_armed(&self) -> bool {
        self.timer.is_armed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::peripherals::LibraryPlayer;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn item(title: &str, category: ContentCategory, secs: u64) -> ContentHandle {
        ContentHandle {
            path: PathBuf::new(),
            title: title.to_string(),
            category,
            duration: Some(Duration::from_secs(secs)),
        }
    }

    fn player_with(clock: Arc<ManualClock>, items: Vec<ContentHandle>) -> LibraryPlayer {
        let mut stress = Vec::new();
        let mut calming = Vec::new();
        for handle in items {
            match handle.category {
                ContentCategory::StressRelief => stress.push(handle),
                ContentCategory::Calming => calming.push(handle),
            }
        }
        LibraryPlayer::from_library(
            vec![
                (ContentCategory::StressRelief, stress),
                (ContentCategory::Calming, calming),
            ],
            clock,
        )
    }

    #[test]
    fn test_timer_only_arms_for_long_items() {
        let mut timer = ReEvaluationTimer::new(Duration::from_secs(60));
        assert!(!timer.arm(Some(Duration::from_secs(45))));
        assert!(!timer.arm(Some(Duration::from_secs(60))));
        assert!(!timer.arm(None));
        assert!(timer.arm(Some(Duration::from_secs(90))));
        assert_eq!(timer.fire_at(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_timer_fires_once() {
        let mut timer = ReEvaluationTimer::new(Duration::from_secs(60));
        timer.arm(Some(Duration::from_secs(90)));
        assert!(!timer.poll(Duration::from_secs(29)));
        assert!(timer.poll(Duration::from_secs(30)));
        assert!(!timer.poll(Duration::from_secs(31)));
        assert!(!timer.is_armed());
    }

    #[test]
    fn test_short_item_never_reevaluates() {
        let clock = Arc::new(ManualClock::default());
        let mut player = player_with(
            clock.clone(),
            vec![item("short", ContentCategory::Calming, 45)],
        );
        let mut scheduler = PlaybackScheduler::new(Duration::from_secs(60));
        scheduler
            .start(
                StressPrediction::new(StressLabel::NoStress, 0.8),
                &mut player,
                clock.as_ref(),
            )
            .unwrap();

        let mut fired = 0;
        while player.is_playing() {
            if scheduler.due_for_reevaluation(clock.as_ref()) {
                fired += 1;
            }
            clock.advance(Duration::from_millis(100));
        }
        assert_eq!(fired, 0);
    }

    #[test]
    fn test_long_item_reevaluates_exactly_once() {
        let clock = Arc::new(ManualClock::default());
        let mut player = player_with(
            clock.clone(),
            vec![item("long", ContentCategory::StressRelief, 90)],
        );
        let mut scheduler = PlaybackScheduler::new(Duration::from_secs(60));
        let started = clock.now();
        scheduler
            .start(
                StressPrediction::new(StressLabel::Stress, 0.7),
                &mut player,
                clock.as_ref(),
            )
            .unwrap();

        let mut fired_at = Vec::new();
        while player.is_playing() {
            if scheduler.due_for_reevaluation(clock.as_ref()) {
                fired_at.push(clock.elapsed_since(started));
            }
            clock.advance(Duration::from_millis(100));
        }
        assert_eq!(fired_at, vec![Duration::from_secs(30)]);
    }

    #[test]
    fn test_category_follows_label() {
        let clock = Arc::new(ManualClock::default());
        let mut player = player_with(
            clock.clone(),
            vec![
                item("relief", ContentCategory::StressRelief, 120),
                item("calm", ContentCategory::Calming, 120),
            ],
        );
        let mut scheduler = PlaybackScheduler::new(Duration::from_secs(60));

        let stress = StressPrediction::new(StressLabel::Stress, 0.8);
        let started = scheduler.start(stress, &mut player, clock.as_ref()).unwrap();
        assert_eq!(started.handle.title, "relief");

        let calm = StressPrediction::new(StressLabel::NoStress, 0.8);
        let started = scheduler.start(calm, &mut player, clock.as_ref()).unwrap();
        assert_eq!(started.handle.title, "calm");
    }

    #[test]
    fn test_missing_content_is_reported() {
        let clock = Arc::new(ManualClock::default());
        let mut player = player_with(clock.clone(), Vec::new());
        let mut scheduler = PlaybackScheduler::new(Duration::from_secs(60));
        let result = scheduler.start(
            StressPrediction::new(StressLabel::Stress, 0.8),
            &mut player,
            clock.as_ref(),
        );
        assert!(matches!(
            result,
            Err(PlayerError::NoContent(ContentCategory::StressRelief))
        ));
        assert!(scheduler.current().is_none());
    }

    #[test]
    fn test_cancel_disarms_pending_reevaluation() {
        let clock = Arc::new(ManualClock::default());
        let mut player = player_with(
            clock.clone(),
            vec![item("long", ContentCategory::StressRelief, 90)],
        );
        let mut scheduler = PlaybackScheduler::new(Duration::from_secs(60));
        scheduler
            .start(
                StressPrediction::new(StressLabel::Stress, 0.7),
                &mut player,
                clock.as_ref(),
            )
            .unwrap();
        assert!(scheduler.is_reevaluation_armed());

        scheduler.cancel();
        assert!(!scheduler.is_reevaluation_armed());
        assert!(scheduler.current().is_none());

        clock.advance(Duration::from_secs(45));
        assert!(!scheduler.due_for_reevaluation(clock.as_ref()));
    }

    #[test]
    fn test_failed_item_is_skipped() {
        let clock = Arc::new(ManualClock::default());
        let mut broken = item("broken", ContentCategory::StressRelief, 120);
        broken.path = PathBuf::from("/nonexistent/broken.mp3");
        let mut player = player_with(
            clock.clone(),
            vec![broken, item("relief", ContentCategory::StressRelief, 120)],
        );
        let mut scheduler = PlaybackScheduler::new(Duration::from_secs(60));

        let started = scheduler
            .start(
                StressPrediction::new(StressLabel::Stress, 0.8),
                &mut player,
                clock.as_ref(),
            )
            .unwrap();
        assert_eq!(started.handle.title, "relief");
        assert!(player.is_playing());
        assert_eq!(player.current().map(|h| h.title.as_str()), Some("relief"));
    }

    #[test]
    fn test_all_items_failing_reports_last_error() {
        let clock = Arc::new(ManualClock::default());
        let mut broken = item("broken", ContentCategory::Calming, 120);
        broken.path = PathBuf::from("/nonexistent/calm.mp3");
        let mut player = player_with(clock.clone(), vec![broken]);
        let mut scheduler = PlaybackScheduler::new(Duration::from_secs(60));

        let result = scheduler.start(
            StressPrediction::new(StressLabel::NoStress, 0.8),
            &mut player,
            clock.as_ref(),
        );
        assert!(matches!(result, Err(PlayerError::Missing(_))));
        assert!(!player.is_playing());
        assert!(scheduler.current().is_none());
    }

    #[test]
    fn test_prediction_messages() {
        assert_eq!(
            prediction_message(&StressPrediction::new(StressLabel::Stress, 0.85)),
            "Stress detected (0.8)\nPlaying relief music"
        );
        assert_eq!(
            prediction_message(&StressPrediction::new(StressLabel::NoStress, 0.6)),
            "Relaxed state (0.6)\nPlaying calming music"
        );
    }
}
