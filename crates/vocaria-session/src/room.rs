//! Room Context Tracker.
//!
//! Holds the visitor's current room as reported by the tour viewer and
//! decides when a room change may be announced in the transcript.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;
use vocaria_core::RoomContext;

/// Result of feeding a room-change signal to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoomUpdate {
    /// The stored room differs from the previous one.
    pub changed: bool,
    /// A system announcement may be appended now.
    pub announce: bool,
}

/// Tracks the current room and throttles announcements by a minimum interval.
#[derive(Debug, Clone)]
pub struct RoomTracker {
    current: Option<RoomContext>,
    announcements_enabled: bool,
    min_interval: Duration,
    last_announced_at: Option<Instant>,
}

impl RoomTracker {
    pub fn new(announcements_enabled: bool, min_interval: Duration) -> Self {
        Self {
            current: None,
            announcements_enabled,
            min_interval,
            last_announced_at: None,
        }
    }

    /// The latest room, if the viewer has reported one.
    pub fn current(&self) -> Option<&RoomContext> {
        self.current.as_ref()
    }

    /// Records a room change.
    ///
    /// `panel_open` gates announcements: nothing is announced while the
    /// conversation panel is hidden. A room with a blank name is ignored and
    /// the previous room stays current.
    pub fn on_room_changed(
        &mut self,
        room: RoomContext,
        panel_open: bool,
        now: Instant,
    ) -> RoomUpdate {
        if room.name.trim().is_empty() {
            debug!("Ignoring room change without a name");
            return RoomUpdate::default();
        }
        if self.current.as_ref() == Some(&room) {
            return RoomUpdate::default();
        }
        debug!(room = %room.name, "Room changed");
        self.current = Some(room);

        let announce = self.announcements_enabled
            && panel_open
            && match self.last_announced_at {
                Some(last) => now.saturating_duration_since(last) >= self.min_interval,
                None => true,
            };
        if announce {
            self.last_announced_at = Some(now);
        }
        RoomUpdate {
            changed: true,
            announce,
        }
    }
}

/// Transcript text announcing a room.
pub fn announcement(room: &RoomContext) -> String {
    format!("Ahora estás en: {}", room.label())
}
