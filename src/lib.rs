//! # ShipShape Sync
//!
//! Track synchronization, propulsion segmentation and trip statistics for
//! boat GPS tracks.
//!
//! This library provides:
//! - Trip statistics (elapsed time, distance, average speed) from a point sequence
//! - Segmentation of a track into contiguous runs by propulsion method, with render styles
//! - A sync coordinator mapping local tracks to a remote path store by remote ID,
//!   with in-flight fetch deduplication and stale viewport result invalidation
//! - A debouncer coalescing map viewport changes into a single bounds query
//! - Recording lifecycle management for the active track
//!
//! ## Features
//!
//! - **`http`** (default) - reqwest-backed [`HttpRemoteApi`]
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use shipshape_sync::{compute_stats, segment_points, GeoPoint, PropulsionMethod};
//!
//! let t0 = Utc.timestamp_opt(1_466_000_000, 0).unwrap();
//! let points = vec![
//!     GeoPoint::new(37.8080, -122.4177, t0).with_propulsion(PropulsionMethod::Sail),
//!     GeoPoint::new(37.8090, -122.4177, t0 + chrono::Duration::seconds(60))
//!         .with_propulsion(PropulsionMethod::Motor),
//! ];
//!
//! let stats = compute_stats(&points);
//! assert_eq!(stats.total_time, 60.0);
//!
//! let segments = segment_points(&points);
//! assert_eq!(segments.len(), 2);
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{OptionExt, Result, SyncError};

// Engine configuration
pub mod config;
pub use config::SyncConfig;

// Geographic utilities (distance, unit conversions)
pub mod geo_utils;

// Trip statistics
pub mod stats;
pub use stats::{compute_stats, TrackStats};

// Propulsion segmentation and render styling
pub mod segments;
pub use segments::{
    segment_points, segment_track, style_for_segment, AnnotationRegistry, Rgba, SegmentStyle,
    StyledSegment, TrackSegment,
};

// Persistence collaborator
pub mod store;
pub use store::{MemoryStore, TrackStore};

// Session (active sailor, vessel, credentials)
pub mod session;
pub use session::{Credentials, Session};

// Wire format
pub mod wire;
pub use wire::{RemotePath, RemotePoint, UploadPayload, UploadResponse};

// Remote transport
pub mod http;
pub use http::RemoteApi;
#[cfg(feature = "http")]
pub use http::HttpRemoteApi;

// Sync coordinator
pub mod sync;
pub use sync::{BatchCallback, SyncCoordinator, TrackCallback, TrackMetadata};

// Viewport query debouncer
pub mod debounce;
pub use debounce::ViewportDebouncer;

// Recording lifecycle
pub mod recorder;
pub use recorder::{Recorder, RecorderState};

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! local_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

local_id!(
    /// Local store identifier of a [`Track`]. Never sent to the server.
    TrackId
);
local_id!(
    /// Local store identifier of a [`Sailor`].
    SailorId
);
local_id!(
    /// Local store identifier of a [`Vessel`].
    VesselId
);

/// Identifies a track either by its server-assigned ID or, before the first
/// successful upload, by its local ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TrackRef {
    Remote(String),
    Local(TrackId),
}

// ============================================================================
// Enumerations
// ============================================================================

/// How the boat was moving when a point was sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropulsionMethod {
    Sail,
    Motor,
    Human,
    Anchor,
    None,
}

impl PropulsionMethod {
    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            PropulsionMethod::Sail => "sail",
            PropulsionMethod::Motor => "motor",
            PropulsionMethod::Human => "human",
            PropulsionMethod::Anchor => "anchor",
            PropulsionMethod::None => "none",
        }
    }

    /// Parse a raw propulsion string (case-insensitive).
    ///
    /// Empty or unrecognized strings yield `None`: the point has no usable
    /// propulsion value.
    pub fn from_raw(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sail" => Some(PropulsionMethod::Sail),
            "motor" => Some(PropulsionMethod::Motor),
            "human" => Some(PropulsionMethod::Human),
            "anchor" => Some(PropulsionMethod::Anchor),
            "none" => Some(PropulsionMethod::None),
            _ => None,
        }
    }
}

/// Whether a track was sailed or is planned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TrackType {
    #[default]
    Past,
    Future,
}

impl TrackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackType::Past => "past",
            TrackType::Future => "future",
        }
    }

    /// Parse a raw type string. Unknown values fall back to `Past`.
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "future" | "planned" => TrackType::Future,
            _ => TrackType::Past,
        }
    }
}

/// Lifecycle state of a track.
///
/// Editing -> Recording -> Complete for local recordings,
/// Downloading -> Complete | Fault for remote fetches. Any state may be
/// forced to Fault when an invariant violation is detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TrackState {
    #[default]
    Editing,
    Recording,
    Complete,
    Downloading,
    Fault,
}

impl TrackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackState::Editing => "editing",
            TrackState::Recording => "recording",
            TrackState::Complete => "complete",
            TrackState::Downloading => "downloading",
            TrackState::Fault => "fault",
        }
    }

    /// Parse a raw state string. Unknown values map to `Fault`.
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "editing" => TrackState::Editing,
            "recording" => TrackState::Recording,
            "complete" => TrackState::Complete,
            "downloading" => TrackState::Downloading,
            _ => TrackState::Fault,
        }
    }
}

// ============================================================================
// Core Types
// ============================================================================

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the coordinate is finite and within range.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// One timestamped location sample.
///
/// Immutable once recorded, apart from `remote_id` which is assigned after sync.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    /// `None` when the sample carried no usable propulsion value
    pub propulsion: Option<PropulsionMethod>,
    pub notes: Option<String>,
    pub remote_id: Option<String>,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            timestamp,
            propulsion: None,
            notes: None,
            remote_id: None,
        }
    }

    pub fn with_propulsion(mut self, propulsion: PropulsionMethod) -> Self {
        self.propulsion = Some(propulsion);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

/// A recorded or planned voyage: ordered points plus metadata.
///
/// `total_time`, `total_distance` and `average_speed` are cached values
/// derived from `points`; call [`Track::refresh_stats`] to recompute them.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub remote_id: Option<String>,
    pub notes: Option<String>,
    /// Seconds
    pub total_time: f64,
    /// Meters
    pub total_distance: f64,
    /// Meters per second
    pub average_speed: f64,
    pub track_type: TrackType,
    pub state: TrackState,
    pub vessel: Option<VesselId>,
    pub creator: Option<SailorId>,
    /// Cached copy of someone else's track, eligible for eviction
    pub temporary: bool,
    /// Chronological; the track owns its points
    pub points: Vec<GeoPoint>,
}

impl Track {
    /// Create an empty track in the `Editing` state.
    pub fn new(title: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            title: title.into(),
            created_at,
            remote_id: None,
            notes: None,
            total_time: 0.0,
            total_distance: 0.0,
            average_speed: 0.0,
            track_type: TrackType::Past,
            state: TrackState::Editing,
            vessel: None,
            creator: None,
            temporary: false,
            points: Vec::new(),
        }
    }

    /// Compute statistics from the point sequence without touching the cache.
    pub fn stats(&self) -> TrackStats {
        compute_stats(&self.points)
    }

    /// Recompute and store the cached statistics.
    pub fn refresh_stats(&mut self) -> TrackStats {
        let stats = self.stats();
        self.total_time = stats.total_time;
        self.total_distance = stats.total_distance;
        self.average_speed = stats.average_speed;
        stats
    }
}

/// A registered user of the app.
#[derive(Debug, Clone, PartialEq)]
pub struct Sailor {
    pub username: String,
    pub real_name: Option<String>,
    pub profile: Option<String>,
}

impl Sailor {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            real_name: None,
            profile: None,
        }
    }
}

/// A boat. Tracks optionally reference the vessel they were sailed on.
#[derive(Debug, Clone, PartialEq)]
pub struct Vessel {
    pub name: String,
    pub owner: Option<SailorId>,
    pub remote_id: Option<String>,
    pub notes: Option<String>,
}

impl Vessel {
    pub fn new(name: impl Into<String>, owner: Option<SailorId>) -> Self {
        Self {
            name: name.into(),
            owner,
            remote_id: None,
            notes: None,
        }
    }
}

/// Four corners of a map viewport.
///
/// The viewport may be rotated, so the corners are kept individually instead
/// of as a min/max box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportQuad {
    pub top_left: Coordinate,
    pub top_right: Coordinate,
    pub bottom_right: Coordinate,
    pub bottom_left: Coordinate,
}

impl ViewportQuad {
    pub fn new(
        top_left: Coordinate,
        top_right: Coordinate,
        bottom_right: Coordinate,
        bottom_left: Coordinate,
    ) -> Self {
        Self {
            top_left,
            top_right,
            bottom_right,
            bottom_left,
        }
    }

    /// Axis-aligned viewport from its edges.
    pub fn from_edges(north: f64, south: f64, east: f64, west: f64) -> Self {
        Self {
            top_left: Coordinate::new(north, west),
            top_right: Coordinate::new(north, east),
            bottom_right: Coordinate::new(south, east),
            bottom_left: Coordinate::new(south, west),
        }
    }

    /// Corners in query order: top-left, top-right, bottom-right, bottom-left.
    pub fn corners(&self) -> [Coordinate; 4] {
        [
            self.top_left,
            self.top_right,
            self.bottom_right,
            self.bottom_left,
        ]
    }
}

// ============================================================================
// Tests
// ============================================================================
