//! Session: who is logged in, which boat they sail, and their API credentials.
//!
//! Passed explicitly to the components that need it instead of living in
//! process-wide globals, so independent sessions can coexist (e.g. in tests).

use std::fmt;

use log::info;

use crate::store::{save_logged, TrackStore};
use crate::{Sailor, SailorId, Track, Vessel, VesselId};

pub const ANONYMOUS_USERNAME: &str = "anonymous";
const DEFAULT_VESSEL_NAME: &str = "anonymous ship";
const LOCAL_REAL_NAME: &str = "Local User";

/// Username/password pair for the remote store.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn anonymous() -> Self {
        Self::new(ANONYMOUS_USERNAME, "")
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// The active sailor, their vessel and their credentials.
#[derive(Debug, Clone)]
pub struct Session {
    pub credentials: Credentials,
    pub sailor: Option<SailorId>,
    pub vessel: Option<VesselId>,
}

impl Session {
    /// A session with credentials but no resolved sailor or vessel.
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            sailor: None,
            vessel: None,
        }
    }

    /// Log in, making sure the sailor and a vessel exist locally.
    ///
    /// If the previous user was anonymous, their tracks move to the new
    /// sailor.
    pub fn log_in<S: TrackStore + ?Sized>(
        store: &mut S,
        previous_username: Option<&str>,
        credentials: Credentials,
    ) -> Self {
        let previous_sailor = previous_username.and_then(|u| store.sailor_by_username(u));

        let sailor = match store.sailor_by_username(&credentials.username) {
            Some(id) => id,
            None => store.insert_sailor(Sailor {
                real_name: Some(LOCAL_REAL_NAME.to_string()),
                ..Sailor::new(credentials.username.clone())
            }),
        };

        let vessel = match store.vessels_owned_by(sailor).first() {
            Some(id) => *id,
            None => store.insert_vessel(Vessel::new(DEFAULT_VESSEL_NAME, Some(sailor))),
        };

        if previous_username == Some(ANONYMOUS_USERNAME) {
            if let Some(old) = previous_sailor.filter(|old| *old != sailor) {
                let moved = store.tracks_by_creator(old);
                info!(
                    "[Session] Moving {} anonymous tracks to '{}'",
                    moved.len(),
                    credentials.username
                );
                for id in moved {
                    if let Some(track) = store.track_mut(id) {
                        track.creator = Some(sailor);
                    }
                }
            }
        }

        save_logged(store, "log in");
        info!(
            "[Session] Logged in as '{}' (sailor {}, vessel {})",
            credentials.username, sailor, vessel
        );

        Self {
            credentials,
            sailor: Some(sailor),
            vessel: Some(vessel),
        }
    }

    pub fn username(&self) -> &str {
        &self.credentials.username
    }

    /// Whether the track was created by this session's sailor.
    pub fn owns(&self, track: &Track) -> bool {
        self.sailor.is_some() && track.creator == self.sailor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_log_in_creates_sailor_and_vessel_once() {
        let mut store = MemoryStore::new();
        let first = Session::log_in(&mut store, None, Credentials::new("sam", "pw"));
        let again = Session::log_in(&mut store, Some("sam"), Credentials::new("sam", "pw"));

        assert_eq!(first.sailor, again.sailor);
        assert_eq!(first.vessel, again.vessel);
        let vessel = store.vessel(first.vessel.unwrap()).unwrap();
        assert_eq!(vessel.name, DEFAULT_VESSEL_NAME);
    }

    #[test]
    fn test_anonymous_tracks_move_to_new_user() {
        let mut store = MemoryStore::new();
        let anon = Session::log_in(&mut store, None, Credentials::anonymous());
        let mut track = Track::new("harbor loop", Utc.timestamp_opt(0, 0).unwrap());
        track.creator = anon.sailor;
        let id = store.insert_track(track);

        let sam = Session::log_in(
            &mut store,
            Some(ANONYMOUS_USERNAME),
            Credentials::new("sam", "pw"),
        );

        assert_eq!(store.track(id).unwrap().creator, sam.sailor);
        assert!(sam.owns(store.track(id).unwrap()));
        assert!(!anon.owns(store.track(id).unwrap()));
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = Credentials::new("sam", "hunter2");
        assert!(!format!("{:?}", creds).contains("hunter2"));
    }
}
