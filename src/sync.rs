//! # Sync Coordinator
//!
//! Maps local tracks to the remote path store by remote ID.
//!
//! ## Ownership
//!
//! The store and the session live behind one lock, the primary context.
//! Every mutation of track state (remote ID assignment, metadata merges,
//! creation, eviction) happens while holding it, and the lock is never held
//! across a network call. Network work runs on owned DTO snapshots; results
//! come back to callers as [`TrackId`]s.
//!
//! ## Duplicate suppression vs. staleness
//!
//! - `fetch_by_id` keeps an in-flight set: a second fetch for the same
//!   remote ID is refused outright with `DuplicateInFlight`. A bounds query
//!   that hits such a refusal waits for the running fetch and then resolves
//!   the path from the store.
//! - `fetch_in_bounds` stamps every call with a generation token. A call
//!   whose token is no longer the latest discards its result with
//!   `Superseded`; its network request is not aborted.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use tokio::sync::watch;

use crate::http::RemoteApi;
use crate::session::{Credentials, Session};
use crate::store::{save_logged, TrackStore};
use crate::wire::{from_epoch_seconds, RemotePath, UploadPayload};
use crate::{
    OptionExt, Result, SailorId, SyncConfig, SyncError, Track, TrackId, TrackState, TrackType,
    ViewportQuad,
};

const DEFAULT_TITLE: &str = "Untitled Track";

/// Called once per track resolved by a bounds query.
pub type TrackCallback = Arc<dyn Fn(TrackId) + Send + Sync>;

/// Called once with every track resolved by a bounds query.
pub type BatchCallback = Arc<dyn Fn(Vec<TrackId>) + Send + Sync>;

// ============================================================================
// Metadata merge
// ============================================================================

/// Track fields known from a remote payload.
///
/// `None` means "not in the payload": applying the update leaves the
/// destination field untouched. Used both to populate a new track and to
/// refresh an existing one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackMetadata {
    pub title: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub remote_id: Option<String>,
    pub notes: Option<String>,
    pub total_time: Option<f64>,
    pub total_distance: Option<f64>,
    pub average_speed: Option<f64>,
    pub track_type: Option<TrackType>,
    pub state: Option<TrackState>,
    pub creator: Option<SailorId>,
}

impl TrackMetadata {
    /// Extract metadata from a remote path; `creator` is the already-resolved
    /// local sailor, if any.
    pub fn from_remote(path: &RemotePath, creator: Option<SailorId>) -> Self {
        Self {
            title: path.title.clone(),
            created_at: path.created.and_then(from_epoch_seconds),
            remote_id: path.id.clone(),
            notes: path.notes.clone(),
            total_time: path.total_time,
            total_distance: path.total_distance,
            average_speed: path.average_speed,
            track_type: path.track_type.as_deref().map(TrackType::from_raw),
            state: path.state.as_deref().map(TrackState::from_raw),
            creator,
        }
    }

    /// Overwrite only the fields present in this update.
    pub fn apply_to(&self, track: &mut Track) {
        if let Some(title) = &self.title {
            track.title = title.clone();
        }
        if let Some(created_at) = self.created_at {
            track.created_at = created_at;
        }
        if let Some(remote_id) = &self.remote_id {
            track.remote_id = Some(remote_id.clone());
        }
        if let Some(notes) = &self.notes {
            track.notes = Some(notes.clone());
        }
        if let Some(total_time) = self.total_time {
            track.total_time = total_time;
        }
        if let Some(total_distance) = self.total_distance {
            track.total_distance = total_distance;
        }
        if let Some(average_speed) = self.average_speed {
            track.average_speed = average_speed;
        }
        if let Some(track_type) = self.track_type {
            track.track_type = track_type;
        }
        if let Some(state) = self.state {
            track.state = state;
        }
        if let Some(creator) = self.creator {
            track.creator = Some(creator);
        }
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// State owned by the primary context.
struct Primary<S> {
    store: S,
    session: Session,
}

impl<S: TrackStore> Primary<S> {
    /// Metadata for `path` with the creator resolved against local sailors.
    /// Unknown creators stay unset; no sailor is created.
    fn metadata_for(&self, path: &RemotePath) -> TrackMetadata {
        let creator = path
            .creator_username()
            .and_then(|username| self.store.sailor_by_username(username));
        TrackMetadata::from_remote(path, creator)
    }

    /// Merge remote metadata into an existing track. A local recording keeps
    /// its state so a remote echo cannot start or end it.
    fn merge_into(&mut self, id: TrackId, mut metadata: TrackMetadata) -> bool {
        let Some(track) = self.store.track_mut(id) else {
            return false;
        };
        if track.state == TrackState::Recording {
            metadata.state = None;
        }
        metadata.apply_to(track);
        true
    }

    /// Tracks cached from other users that the latest viewport no longer shows.
    ///
    /// A track survives if it was resolved by the query or if its remote ID
    /// is among the paths the query returned, even when it was stored by
    /// another fetch.
    fn evict_temporary(
        &mut self,
        keep: &HashSet<TrackId>,
        keep_remote: &HashSet<String>,
    ) -> Vec<TrackId> {
        let stale: Vec<TrackId> = self
            .store
            .track_ids()
            .into_iter()
            .filter(|id| !keep.contains(id))
            .filter(|id| {
                self.store.track(*id).is_some_and(|t| {
                    t.temporary
                        && !self.session.owns(t)
                        && !t
                            .remote_id
                            .as_ref()
                            .is_some_and(|r| keep_remote.contains(r))
                })
            })
            .collect();
        for id in &stale {
            self.store.delete_track(*id);
        }
        stale
    }
}

/// In-flight fetches by remote ID. Each receiver observes its fetch ending
/// when the matching sender is dropped.
type InFlight = Mutex<HashMap<String, watch::Receiver<()>>>;

/// Removes a remote ID from the in-flight set when the fetch ends, however it
/// ends, and wakes anyone waiting on it.
struct InFlightGuard<'a> {
    in_flight: &'a InFlight,
    remote_id: String,
    _done: watch::Sender<()>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.remote_id);
    }
}

/// Bidirectional sync between the local store and the remote path store.
pub struct SyncCoordinator<A: RemoteApi, S: TrackStore> {
    api: A,
    primary: Mutex<Primary<S>>,
    in_flight: InFlight,
    bounds_generation: AtomicU64,
    max_concurrent_fetches: usize,
}

impl<A: RemoteApi, S: TrackStore> SyncCoordinator<A, S> {
    pub fn new(api: A, store: S, session: Session) -> Self {
        Self {
            api,
            primary: Mutex::new(Primary { store, session }),
            in_flight: Mutex::new(HashMap::new()),
            bounds_generation: AtomicU64::new(0),
            max_concurrent_fetches: SyncConfig::default().max_concurrent_fetches,
        }
    }

    /// Apply the coordinator-side settings of `config`.
    pub fn with_config(mut self, config: &SyncConfig) -> Self {
        self.max_concurrent_fetches = config.max_concurrent_fetches.max(1);
        self
    }

    fn primary(&self) -> MutexGuard<'_, Primary<S>> {
        self.primary.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Run `f` on the primary context with exclusive access to the store.
    pub fn with_store<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut S) -> R,
    {
        f(&mut self.primary().store)
    }

    pub fn session(&self) -> Session {
        self.primary().session.clone()
    }

    pub fn set_session(&self, session: Session) {
        self.primary().session = session;
    }

    /// Log in against the local store, make the result the active session
    /// and authenticate later requests as the new user.
    pub fn log_in(&self, credentials: Credentials) -> Session {
        let session = {
            let mut primary = self.primary();
            let previous = primary.session.username().to_string();
            let session = Session::log_in(&mut primary.store, Some(&previous), credentials);
            primary.session = session.clone();
            session
        };
        self.api.set_credentials(&session.credentials);
        session
    }

    // ========================================================================
    // Upload
    // ========================================================================

    /// Upload a track and record the server-assigned path ID as its remote ID.
    ///
    /// Cached stats are refreshed first. A track without points is rejected
    /// before any network call. Failures leave local state untouched and are
    /// not retried.
    pub async fn upload(&self, id: TrackId) -> Result<String> {
        let payload = {
            let mut primary = self.primary();
            let store = &mut primary.store;

            let track = store
                .track_mut(id)
                .ok_or_not_found(&format!("track {}", id))?;
            if track.points.is_empty() {
                warn!("[SyncCoordinator] Not uploading track {}: it has no points", id);
                return Err(SyncError::ValidationError {
                    message: format!("track {} has no points", id),
                });
            }
            track.refresh_stats();

            let track = store
                .track(id)
                .ok_or_not_found(&format!("track {}", id))?;
            let vessel = track.vessel.and_then(|v| store.vessel(v));
            UploadPayload::from_track(track, vessel)
        };

        let response = self.api.upload_path(&payload).await.map_err(|e| {
            warn!("[SyncCoordinator] Upload of track {} failed: {}", id, e);
            e
        })?;
        let path_id = response.into_path_id().map_err(|e| {
            warn!("[SyncCoordinator] Upload of track {} returned no path ID", id);
            e
        })?;

        let mut primary = self.primary();
        match primary.store.track_mut(id) {
            Some(track) => {
                track.remote_id = Some(path_id.clone());
                save_logged(&mut primary.store, "upload");
                info!(
                    "[SyncCoordinator] Uploaded track {} ({} points) as '{}'",
                    id,
                    payload.points.len(),
                    path_id
                );
            }
            None => warn!(
                "[SyncCoordinator] Track {} was deleted while uploading as '{}'",
                id, path_id
            ),
        }
        Ok(path_id)
    }

    // ========================================================================
    // Fetch by ID
    // ========================================================================

    fn begin_fetch(&self, remote_id: &str) -> Result<InFlightGuard<'_>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if in_flight.contains_key(remote_id) {
            debug!("[SyncCoordinator] Fetch for '{}' already in flight", remote_id);
            return Err(SyncError::DuplicateInFlight {
                remote_id: remote_id.to_string(),
            });
        }
        let (done, finished) = watch::channel(());
        in_flight.insert(remote_id.to_string(), finished);
        Ok(InFlightGuard {
            in_flight: &self.in_flight,
            remote_id: remote_id.to_string(),
            _done: done,
        })
    }

    /// Whether a fetch for `remote_id` is currently running.
    pub fn is_fetch_in_flight(&self, remote_id: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(remote_id)
    }

    /// Wait until the running fetch for `remote_id`, if any, has ended.
    async fn wait_for_fetch(&self, remote_id: &str) {
        let finished = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(remote_id)
            .cloned();
        if let Some(mut finished) = finished {
            // Errors once the fetch's sender is dropped.
            while finished.changed().await.is_ok() {}
        }
    }

    fn local_track(&self, remote_id: &str) -> Option<TrackId> {
        self.primary().store.find_by_remote_id(remote_id)
    }

    /// Fetch a path for a bounds query. A fetch already running elsewhere is
    /// awaited and its stored result used instead of starting another.
    async fn resolve_missing(&self, remote_id: &str) -> Option<TrackId> {
        match self.fetch_by_id(remote_id, true).await {
            Ok(id) => Some(id),
            Err(SyncError::DuplicateInFlight { .. }) => {
                self.wait_for_fetch(remote_id).await;
                let id = self.local_track(remote_id);
                if id.is_none() {
                    debug!("[SyncCoordinator] Shared fetch of '{}' stored nothing", remote_id);
                }
                id
            }
            Err(e) => {
                debug!("[SyncCoordinator] Path '{}' not resolved: {}", remote_id, e);
                None
            }
        }
    }

    /// Fetch a path and store it locally, returning the local track ID.
    ///
    /// At most one fetch per remote ID runs at a time. A track that already
    /// exists locally is marked `Downloading` for the duration and refreshed
    /// in place; otherwise a new track is created only once the response has
    /// been decoded, so failures leave nothing behind.
    pub async fn fetch_by_id(&self, remote_id: &str, include_points: bool) -> Result<TrackId> {
        let _guard = self.begin_fetch(remote_id)?;

        let previous = {
            let mut primary = self.primary();
            let mut previous = None;
            if let Some(id) = primary.store.find_by_remote_id(remote_id) {
                if let Some(track) = primary.store.track_mut(id) {
                    previous = Some((id, track.state));
                    if track.state != TrackState::Recording {
                        track.state = TrackState::Downloading;
                    }
                }
            }
            previous
        };

        let result = self.api.fetch_path(remote_id, include_points).await;

        let mut primary = self.primary();
        let path = match result {
            Ok(path) => path,
            Err(e) => {
                warn!("[SyncCoordinator] Fetch of '{}' failed: {}", remote_id, e);
                if let Some((id, previous_state)) = previous {
                    let restored = match e {
                        SyncError::DecodeError { .. } => TrackState::Fault,
                        _ => previous_state,
                    };
                    if let Some(track) = primary.store.track_mut(id) {
                        track.state = restored;
                    }
                }
                return Err(e);
            }
        };

        let mut metadata = primary.metadata_for(&path);
        metadata.remote_id = Some(remote_id.to_string());
        if metadata.state.is_none() {
            metadata.state = Some(TrackState::Complete);
        }

        let created_at = metadata.created_at.unwrap_or_else(Utc::now);
        let points: Option<Vec<_>> = if include_points {
            path.points.as_ref().map(|points| {
                points
                    .iter()
                    .filter_map(|p| p.to_geo_point(created_at))
                    .collect()
            })
        } else {
            None
        };

        // The track may have been created locally since the fetch began.
        let existing = previous
            .map(|(id, _)| id)
            .filter(|id| primary.store.track(*id).is_some())
            .or_else(|| primary.store.find_by_remote_id(remote_id));

        let id = match existing {
            Some(id) => {
                primary.merge_into(id, metadata);
                if let (Some(points), Some(track)) = (points, primary.store.track_mut(id)) {
                    track.points = points;
                }
                id
            }
            None => {
                let mut track = Track::new(DEFAULT_TITLE, created_at);
                metadata.apply_to(&mut track);
                track.points = points.unwrap_or_default();
                track.temporary = !primary.session.owns(&track);
                primary.store.insert_track(track)
            }
        };

        save_logged(&mut primary.store, "fetch");
        debug!(
            "[SyncCoordinator] Fetched '{}' into track {}",
            remote_id, id
        );
        Ok(id)
    }

    // ========================================================================
    // Fetch in bounds
    // ========================================================================

    fn is_stale(&self, token: u64) -> bool {
        self.bounds_generation.load(Ordering::SeqCst) != token
    }

    /// Resolve every path intersecting `quad` to a local track.
    ///
    /// Paths already stored locally are refreshed in place and reported to
    /// `on_each` right away; the rest are fetched concurrently and reported
    /// as each fetch lands, in no particular order. Returns the full set of
    /// resolved tracks once every path has been matched or has finished its
    /// fetch attempt.
    ///
    /// A newer call supersedes this one: the result is then discarded with
    /// `SyncError::Superseded` and no further `on_each` calls are made.
    /// Staleness is checked when the response arrives, again after acquiring
    /// the primary context, and once more before returning.
    pub async fn fetch_in_bounds(
        &self,
        quad: ViewportQuad,
        on_each: Option<TrackCallback>,
    ) -> Result<Vec<TrackId>> {
        let token = self.bounds_generation.fetch_add(1, Ordering::SeqCst) + 1;

        let paths = match self.api.fetch_paths_in_bounds(&quad).await {
            Ok(paths) => paths,
            Err(_) if self.is_stale(token) => return Err(SyncError::Superseded),
            Err(e) => {
                warn!("[SyncCoordinator] Bounds query failed: {}", e);
                return Err(e);
            }
        };
        if self.is_stale(token) {
            debug!("[SyncCoordinator] Dropping superseded bounds result {}", token);
            return Err(SyncError::Superseded);
        }

        let (matched, missing, seen) = {
            let mut primary = self.primary();
            if self.is_stale(token) {
                debug!("[SyncCoordinator] Dropping superseded bounds result {}", token);
                return Err(SyncError::Superseded);
            }

            let mut seen = HashSet::new();
            let mut matched = Vec::new();
            let mut missing = Vec::new();
            for path in &paths {
                let Some(remote_id) = path.id.as_deref() else {
                    debug!("[SyncCoordinator] Skipping path without an ID");
                    continue;
                };
                if !seen.insert(remote_id.to_string()) {
                    continue;
                }
                match primary.store.find_by_remote_id(remote_id) {
                    Some(id) => {
                        let metadata = primary.metadata_for(path);
                        primary.merge_into(id, metadata);
                        matched.push(id);
                    }
                    None => missing.push(remote_id.to_string()),
                }
            }
            if !matched.is_empty() {
                save_logged(&mut primary.store, "bounds refresh");
            }
            (matched, missing, seen)
        };

        if let Some(callback) = &on_each {
            for id in &matched {
                callback(*id);
            }
        }

        // Join point: every per-path fetch must finish before completion.
        let fetches = missing.iter().cloned().map(|remote_id| {
            let on_each = on_each.clone();
            async move {
                let id = self.resolve_missing(&remote_id).await?;
                if let Some(callback) = on_each.filter(|_| !self.is_stale(token)) {
                    callback(id);
                }
                Some(id)
            }
        });
        let fetched: Vec<Option<TrackId>> = stream::iter(fetches)
            .buffer_unordered(self.max_concurrent_fetches)
            .collect()
            .await;

        let mut resolved = matched;
        resolved.extend(fetched.into_iter().flatten());

        let mut primary = self.primary();
        if self.is_stale(token) {
            debug!("[SyncCoordinator] Dropping superseded bounds result {}", token);
            return Err(SyncError::Superseded);
        }
        let keep: HashSet<TrackId> = resolved.iter().copied().collect();
        let evicted = primary.evict_temporary(&keep, &seen);
        if !evicted.is_empty() {
            save_logged(&mut primary.store, "eviction");
        }
        info!(
            "[SyncCoordinator] Bounds query resolved {} paths ({} fetched, {} evicted)",
            resolved.len(),
            missing.len(),
            evicted.len()
        );
        Ok(resolved)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{RemoteCreator, RemotePoint, UploadResponse};
    use crate::{GeoPoint, MemoryStore, Sailor};
    use chrono::TimeZone;
    use futures::future::{BoxFuture, FutureExt};
    use std::sync::atomic::AtomicUsize;

    /// Answers from fixed tables. Path fetches yield a few times so that
    /// concurrent fetches overlap.
    #[derive(Default)]
    struct TableApi {
        paths: HashMap<String, RemotePath>,
        bounds: Vec<RemotePath>,
        upload: Option<Result<UploadResponse>>,
        authenticated_as: Mutex<Option<String>>,
        active_fetches: AtomicUsize,
        peak_fetches: AtomicUsize,
    }

    impl RemoteApi for TableApi {
        fn upload_path<'a>(
            &'a self,
            _payload: &'a UploadPayload,
        ) -> BoxFuture<'a, Result<UploadResponse>> {
            let response = self.upload.clone().unwrap_or(Err(SyncError::NetworkUnreachable {
                message: "offline".to_string(),
            }));
            async move { response }.boxed()
        }

        fn fetch_path<'a>(
            &'a self,
            remote_id: &'a str,
            _include_points: bool,
        ) -> BoxFuture<'a, Result<RemotePath>> {
            let response = self.paths.get(remote_id).cloned().ok_or(SyncError::ServerError {
                status: 404,
                message: "Not Found".to_string(),
            });
            async move {
                let active = self.active_fetches.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak_fetches.fetch_max(active, Ordering::SeqCst);
                for _ in 0..3 {
                    tokio::task::yield_now().await;
                }
                self.active_fetches.fetch_sub(1, Ordering::SeqCst);
                response
            }
            .boxed()
        }

        fn fetch_paths_in_bounds<'a>(
            &'a self,
            _quad: &'a ViewportQuad,
        ) -> BoxFuture<'a, Result<Vec<RemotePath>>> {
            let paths = self.bounds.clone();
            async move { Ok(paths) }.boxed()
        }

        fn set_credentials(&self, credentials: &Credentials) {
            *self.authenticated_as.lock().unwrap() = Some(credentials.username.clone());
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_466_000_000 + secs, 0).unwrap()
    }

    fn remote(id: &str, title: Option<&str>, creator: Option<&str>) -> RemotePath {
        RemotePath {
            id: Some(id.to_string()),
            title: title.map(str::to_string),
            created: Some(1_466_000_000.0),
            creator: creator.map(|u| RemoteCreator {
                username: Some(u.to_string()),
            }),
            points: Some(vec![RemotePoint {
                latitude: Some(37.8),
                longitude: Some(-122.4),
                created: Some(1_466_000_000.0),
                propulsion: Some("sail".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }
    }

    fn quad() -> ViewportQuad {
        ViewportQuad::from_edges(38.0, 37.0, -122.0, -123.0)
    }

    #[test]
    fn test_merge_only_overwrites_present_fields() {
        let mut track = Track::new("bar", at(0));
        track.notes = Some("foo".to_string());

        let update = TrackMetadata {
            title: Some("baz".to_string()),
            ..Default::default()
        };
        update.apply_to(&mut track);

        assert_eq!(track.title, "baz");
        assert_eq!(track.notes.as_deref(), Some("foo"));
        assert_eq!(track.created_at, at(0));
    }

    #[test]
    fn test_metadata_from_remote_maps_enums() {
        let mut path = remote("x", Some("t"), None);
        path.state = Some("bogus".to_string());
        path.track_type = Some("planned".to_string());
        let metadata = TrackMetadata::from_remote(&path, None);
        assert_eq!(metadata.state, Some(TrackState::Fault));
        assert_eq!(metadata.track_type, Some(TrackType::Future));
        assert_eq!(metadata.created_at, Some(at(0)));
    }

    #[tokio::test]
    async fn test_upload_rejects_empty_track() {
        let mut store = MemoryStore::new();
        let id = store.insert_track(Track::new("empty", at(0)));
        let sync = SyncCoordinator::new(TableApi::default(), store, Session::new(Credentials::anonymous()));

        let err = sync.upload(id).await.unwrap_err();
        assert!(matches!(err, SyncError::ValidationError { .. }));
        assert!(err.is_short_circuit());
    }

    #[tokio::test]
    async fn test_upload_failure_leaves_track_untouched() {
        let mut store = MemoryStore::new();
        let mut track = Track::new("t", at(0));
        track.points.push(GeoPoint::new(37.8, -122.4, at(0)));
        let id = store.insert_track(track);
        let sync = SyncCoordinator::new(TableApi::default(), store, Session::new(Credentials::anonymous()));

        assert!(matches!(
            sync.upload(id).await,
            Err(SyncError::NetworkUnreachable { .. })
        ));
        assert_eq!(sync.with_store(|s| s.track(id).unwrap().remote_id.clone()), None);
    }

    #[tokio::test]
    async fn test_upload_without_path_id_is_decode_error() {
        let mut store = MemoryStore::new();
        let mut track = Track::new("t", at(0));
        track.points.push(GeoPoint::new(37.8, -122.4, at(0)));
        let id = store.insert_track(track);
        let api = TableApi {
            upload: Some(Ok(UploadResponse { path_id: None })),
            ..Default::default()
        };
        let sync = SyncCoordinator::new(api, store, Session::new(Credentials::anonymous()));

        assert!(matches!(sync.upload(id).await, Err(SyncError::DecodeError { .. })));
        assert_eq!(sync.with_store(|s| s.track(id).unwrap().remote_id.clone()), None);
    }

    #[tokio::test]
    async fn test_fetch_by_id_resolves_known_creator_only() {
        let mut store = MemoryStore::new();
        let kim = store.insert_sailor(Sailor::new("kim"));
        let mut api = TableApi::default();
        api.paths.insert("a".into(), remote("a", Some("Bay Loop"), Some("kim")));
        api.paths.insert("b".into(), remote("b", None, Some("stranger")));
        let sync = SyncCoordinator::new(api, store, Session::new(Credentials::anonymous()));

        let a = sync.fetch_by_id("a", true).await.unwrap();
        let b = sync.fetch_by_id("b", false).await.unwrap();

        sync.with_store(|s| {
            let a = s.track(a).unwrap();
            assert_eq!(a.title, "Bay Loop");
            assert_eq!(a.creator, Some(kim));
            assert_eq!(a.remote_id.as_deref(), Some("a"));
            assert_eq!(a.state, TrackState::Complete);
            assert_eq!(a.points.len(), 1);
            assert!(a.temporary);

            let b = s.track(b).unwrap();
            assert_eq!(b.title, DEFAULT_TITLE);
            assert_eq!(b.creator, None);
            assert!(b.points.is_empty());
            assert!(s.sailor_by_username("stranger").is_none());
        });
        assert!(!sync.is_fetch_in_flight("a"));
    }

    #[tokio::test]
    async fn test_fetch_by_id_failure_leaves_no_record() {
        let sync = SyncCoordinator::new(
            TableApi::default(),
            MemoryStore::new(),
            Session::new(Credentials::anonymous()),
        );
        assert!(matches!(
            sync.fetch_by_id("missing", true).await,
            Err(SyncError::ServerError { status: 404, .. })
        ));
        assert_eq!(sync.with_store(|s| s.track_count()), 0);
        assert!(!sync.is_fetch_in_flight("missing"));
    }

    #[tokio::test]
    async fn test_refetch_updates_existing_track_in_place() {
        let mut store = MemoryStore::new();
        let mut local = Track::new("old title", at(0));
        local.remote_id = Some("a".to_string());
        local.notes = Some("keep me".to_string());
        let id = store.insert_track(local);

        let mut api = TableApi::default();
        api.paths.insert("a".into(), remote("a", Some("new title"), None));
        let sync = SyncCoordinator::new(api, store, Session::new(Credentials::anonymous()));

        assert_eq!(sync.fetch_by_id("a", true).await.unwrap(), id);
        sync.with_store(|s| {
            assert_eq!(s.track_count(), 1);
            let track = s.track(id).unwrap();
            assert_eq!(track.title, "new title");
            assert_eq!(track.notes.as_deref(), Some("keep me"));
            assert_eq!(track.state, TrackState::Complete);
            assert_eq!(track.points.len(), 1);
        });
    }

    #[tokio::test]
    async fn test_bounds_merges_existing_and_fetches_missing() {
        let mut store = MemoryStore::new();
        let mut local = Track::new("local", at(0));
        local.remote_id = Some("a".to_string());
        let local_id = store.insert_track(local);

        let mut api = TableApi::default();
        api.bounds = vec![
            remote("a", Some("renamed"), None),
            remote("b", Some("new"), None),
            remote("b", Some("dupe"), None),
            remote("gone", None, None),
        ];
        api.paths.insert("b".into(), remote("b", Some("new"), None));
        let sync = SyncCoordinator::new(api, store, Session::new(Credentials::anonymous()));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let on_each: TrackCallback = Arc::new(move |id| sink.lock().unwrap().push(id));

        let resolved = sync.fetch_in_bounds(quad(), Some(on_each)).await.unwrap();

        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0], local_id);
        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        let mut expected = resolved.clone();
        expected.sort();
        assert_eq!(seen, expected);
        assert_eq!(sync.with_store(|s| s.track(local_id).unwrap().title.clone()), "renamed");
    }

    #[tokio::test]
    async fn test_bounds_evicts_foreign_temporaries_outside_result() {
        let mut store = MemoryStore::new();
        let mut foreign = Track::new("someone else", at(0));
        foreign.temporary = true;
        let foreign_id = store.insert_track(foreign);

        let session = Session::log_in(&mut store, None, Credentials::new("sam", "pw"));
        let mut own = Track::new("mine", at(0));
        own.temporary = true;
        own.creator = session.sailor;
        let own_id = store.insert_track(own);
        let permanent_id = store.insert_track(Track::new("kept", at(0)));

        let sync = SyncCoordinator::new(TableApi::default(), store, session);
        let resolved = sync.fetch_in_bounds(quad(), None).await.unwrap();

        assert!(resolved.is_empty());
        sync.with_store(|s| {
            assert!(s.track(foreign_id).is_none());
            assert!(s.track(own_id).is_some());
            assert!(s.track(permanent_id).is_some());
        });
    }

    #[tokio::test]
    async fn test_bounds_does_not_change_local_recording_state() {
        let mut store = MemoryStore::new();
        let mut recording = Track::new("live", at(0));
        recording.remote_id = Some("a".to_string());
        recording.state = TrackState::Recording;
        let id = store.insert_track(recording);

        let mut path = remote("a", None, None);
        path.state = Some("complete".to_string());
        let api = TableApi {
            bounds: vec![path],
            ..Default::default()
        };
        let sync = SyncCoordinator::new(api, store, Session::new(Credentials::anonymous()));
        sync.fetch_in_bounds(quad(), None).await.unwrap();

        assert_eq!(sync.with_store(|s| s.track(id).unwrap().state), TrackState::Recording);
    }

    #[tokio::test]
    async fn test_bounds_fetches_respect_concurrency_limit() {
        let mut api = TableApi::default();
        for n in 0..5 {
            let id = format!("p{}", n);
            api.bounds.push(remote(&id, None, None));
            api.paths.insert(id.clone(), remote(&id, Some("fetched"), None));
        }
        let sync = SyncCoordinator::new(api, MemoryStore::new(), Session::new(Credentials::anonymous()))
            .with_config(&SyncConfig::default().with_max_concurrent_fetches(2));

        let resolved = sync.fetch_in_bounds(quad(), None).await.unwrap();

        assert_eq!(resolved.len(), 5);
        let peak = sync.api().peak_fetches.load(Ordering::SeqCst);
        assert!((1..=2).contains(&peak), "peak concurrency was {}", peak);
        assert_eq!(sync.with_store(|s| s.track_count()), 5);
    }

    #[test]
    fn test_eviction_keeps_tracks_named_by_the_query() {
        let mut store = MemoryStore::new();
        let mut shared = Track::new("fetched elsewhere", at(0));
        shared.temporary = true;
        shared.remote_id = Some("x".to_string());
        let shared_id = store.insert_track(shared);
        let mut other = Track::new("out of view", at(0));
        other.temporary = true;
        other.remote_id = Some("y".to_string());
        let other_id = store.insert_track(other);

        let mut primary = Primary {
            store,
            session: Session::new(Credentials::anonymous()),
        };
        let keep_remote: HashSet<String> = ["x".to_string()].into_iter().collect();
        let evicted = primary.evict_temporary(&HashSet::new(), &keep_remote);

        assert_eq!(evicted, vec![other_id]);
        assert!(primary.store.track(shared_id).is_some());
    }

    #[test]
    fn test_log_in_reauthenticates_api() {
        let sync = SyncCoordinator::new(
            TableApi::default(),
            MemoryStore::new(),
            Session::new(Credentials::anonymous()),
        );

        let session = sync.log_in(Credentials::new("sam", "pw"));

        assert_eq!(session.username(), "sam");
        assert!(session.sailor.is_some());
        assert_eq!(sync.session().sailor, session.sailor);
        assert_eq!(sync.api().authenticated_as.lock().unwrap().as_deref(), Some("sam"));
    }
}
