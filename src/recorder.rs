//! Recording lifecycle of the active track.
//!
//! At most one track may be `Recording` at a time. [`Recorder::initialize`]
//! repairs stores where that no longer holds (e.g. after a crash mid-recording).

use std::fmt;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use crate::session::Session;
use crate::store::{save_logged, TrackStore};
use crate::{GeoPoint, Track, TrackId, TrackState};

const ACTIVE_TRACK_TITLE: &str = "Active Route";

/// What the recorder is doing with incoming location samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecorderState {
    #[default]
    Stopped,
    Recording,
    Paused,
}

impl fmt::Display for RecorderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecorderState::Stopped => "stopped",
            RecorderState::Recording => "recording",
            RecorderState::Paused => "paused",
        };
        f.write_str(name)
    }
}

/// Drives the active track through Recording -> Complete.
#[derive(Debug, Default)]
pub struct Recorder {
    state: RecorderState,
    active: Option<TrackId>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn active_track(&self) -> Option<TrackId> {
        self.active
    }

    /// Resume a recording left open in the store.
    ///
    /// The lowest-ID `Recording` track becomes active; any others are forced
    /// to `Fault`. Returns the demoted tracks.
    pub fn initialize<S: TrackStore + ?Sized>(&mut self, store: &mut S) -> Vec<TrackId> {
        let recording = store.tracks_with_state(TrackState::Recording);
        let Some((&first, extras)) = recording.split_first() else {
            return Vec::new();
        };

        for id in extras {
            if let Some(track) = store.track_mut(*id) {
                track.state = TrackState::Fault;
            }
        }
        if !extras.is_empty() {
            warn!(
                "[Recorder] {} tracks were recording; keeping {} and faulting the rest",
                recording.len(),
                first
            );
        }

        self.active = Some(first);
        self.state = RecorderState::Recording;
        save_logged(store, "recorder initialize");
        info!("[Recorder] Resumed recording track {}", first);
        extras.to_vec()
    }

    /// Move to `new_state`. Returns the previous state if anything changed.
    ///
    /// Stopped -> Recording creates the active track unless one exists;
    /// Recording or Paused -> Stopped completes it.
    pub fn change_state<S: TrackStore + ?Sized>(
        &mut self,
        store: &mut S,
        session: &Session,
        new_state: RecorderState,
        now: DateTime<Utc>,
    ) -> Option<RecorderState> {
        let old_state = self.state;
        if old_state == new_state {
            return None;
        }

        match (old_state, new_state) {
            (RecorderState::Stopped, RecorderState::Recording) => {
                if self.active.is_none() {
                    let mut track = Track::new(ACTIVE_TRACK_TITLE, now);
                    track.state = TrackState::Recording;
                    track.creator = session.sailor;
                    track.vessel = session.vessel;
                    let id = store.insert_track(track);
                    save_logged(store, "start recording");
                    self.active = Some(id);
                }
            }
            (_, RecorderState::Stopped) => self.complete_active(store),
            _ => {}
        }

        self.state = new_state;
        info!("[Recorder] {} -> {}", old_state, new_state);
        Some(old_state)
    }

    /// Start a new recording, or resume a paused one. Returns the active track.
    pub fn start<S: TrackStore + ?Sized>(
        &mut self,
        store: &mut S,
        session: &Session,
        now: DateTime<Utc>,
    ) -> Option<TrackId> {
        self.change_state(store, session, RecorderState::Recording, now);
        self.active
    }

    pub fn pause<S: TrackStore + ?Sized>(&mut self, store: &mut S, session: &Session) {
        if self.state == RecorderState::Recording {
            self.change_state(store, session, RecorderState::Paused, Utc::now());
        }
    }

    /// Complete the active track. Returns it.
    pub fn stop<S: TrackStore + ?Sized>(&mut self, store: &mut S, session: &Session) -> Option<TrackId> {
        let active = self.active;
        self.change_state(store, session, RecorderState::Stopped, Utc::now());
        active
    }

    /// Append location samples to the active track.
    ///
    /// Ignored unless recording. Returns how many points were stored.
    pub fn record<S: TrackStore + ?Sized>(&mut self, store: &mut S, points: &[GeoPoint]) -> usize {
        if self.state != RecorderState::Recording {
            debug!("[Recorder] Ignoring {} points while {}", points.len(), self.state);
            return 0;
        }
        let Some(track) = self.active.and_then(|id| store.track_mut(id)) else {
            return 0;
        };
        track.points.extend_from_slice(points);
        save_logged(store, "record");
        points.len()
    }

    fn complete_active<S: TrackStore + ?Sized>(&mut self, store: &mut S) {
        let Some(id) = self.active.take() else {
            return;
        };
        match store.track_mut(id) {
            Some(track) => {
                track.state = TrackState::Complete;
                let stats = track.refresh_stats();
                info!(
                    "[Recorder] Completed track {}: {} points, {:.0} m",
                    id,
                    track.points.len(),
                    stats.total_distance
                );
                save_logged(store, "stop recording");
            }
            None => warn!("[Recorder] Active track {} disappeared before stop", id),
        }
    }
}
