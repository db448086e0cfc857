//! # Propulsion Segmentation
//!
//! Splits a track's points into contiguous runs sharing one propulsion
//! method, and assigns each run a render style.
//!
//! ## Boundary rules
//!
//! - The first point carrying a propulsion value seeds the current method.
//!   Leading points without one join that first run.
//! - A point whose method differs from the current one closes the run
//!   *before* itself; the point then opens the next run.
//! - A point without a propulsion value after a seeded run closes that run
//!   and un-seeds the method, so the next valued point seeds again without
//!   opening another run.
//! - The open run is always closed at the end, even when empty. A track
//!   with no points therefore yields one empty segment with `None`.
//!
//! Single pass, O(n), no backtracking.

use std::collections::HashMap;

use crate::{Coordinate, GeoPoint, PropulsionMethod, Track, TrackId, TrackRef, TrackState};

// ============================================================================
// Segments
// ============================================================================

/// A maximal contiguous run of a track's points sharing one propulsion method.
///
/// Derived and ephemeral; rebuilt whenever the track's annotation is.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackSegment {
    pub propulsion: PropulsionMethod,
    pub coordinates: Vec<Coordinate>,
    /// Owning track, when segmented through [`segment_track`]
    pub parent: Option<TrackRef>,
    pub color_index: u32,
}

/// Segment a bare point sequence.
pub fn segment_points(points: &[GeoPoint]) -> Vec<TrackSegment> {
    let mut segments = Vec::new();
    let mut current: Option<PropulsionMethod> = None;
    let mut coordinates: Vec<Coordinate> = Vec::new();

    for point in points {
        let next = point.propulsion;
        if current.is_none() && next.is_some() {
            current = next;
        }

        if next != current {
            segments.push(close_segment(current, std::mem::take(&mut coordinates)));
            current = next;
        }

        coordinates.push(point.coordinate());
    }

    segments.push(close_segment(current, coordinates));
    segments
}

fn close_segment(propulsion: Option<PropulsionMethod>, coordinates: Vec<Coordinate>) -> TrackSegment {
    TrackSegment {
        propulsion: propulsion.unwrap_or(PropulsionMethod::None),
        coordinates,
        parent: None,
        color_index: 0,
    }
}

/// Segment a stored track, tagging each segment with its parent and color index.
///
/// The parent is the remote ID once the track has synced, the local ID before.
pub fn segment_track(id: TrackId, track: &Track, color_index: u32) -> Vec<TrackSegment> {
    let parent = match &track.remote_id {
        Some(remote_id) => TrackRef::Remote(remote_id.clone()),
        None => TrackRef::Local(id),
    };

    segment_points(&track.points)
        .into_iter()
        .map(|mut segment| {
            segment.parent = Some(parent.clone());
            segment.color_index = color_index;
            segment
        })
        .collect()
}

// ============================================================================
// Styling
// ============================================================================

/// RGBA color with components in 0..=1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Rgba {
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub const fn with_alpha(self, a: f32) -> Self {
        Self { a, ..self }
    }
}

/// Brand color for the active user's tracks.
pub const OWN_TRACK_COLOR: Rgba = Rgba::new(0.94, 0.30, 0.30, 1.0);
/// Alert color for tracks currently being recorded.
pub const RECORDING_COLOR: Rgba = Rgba::new(1.0, 0.76, 0.03, 1.0);
/// Fixed hue and alpha for other users' tracks.
pub const OTHER_TRACK_COLOR: Rgba = Rgba::new(0.20, 0.45, 0.85, 0.6);

const OWN_LINE_WIDTH: f32 = 5.0;
const OTHER_LINE_WIDTH: f32 = 3.0;
const ALPHA_STEP: f32 = 0.15;
const MIN_ALPHA: f32 = 0.25;

/// How a segment should be drawn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentStyle {
    pub color: Rgba,
    pub line_width: f32,
}

/// Render style as a pure function of ownership, color index and track state.
///
/// Recording tracks always get the alert color at full opacity. Own tracks
/// fade with each color index handed out; other users' tracks use a fixed hue.
pub fn style_for_segment(is_own_track: bool, color_index: u32, state: TrackState) -> SegmentStyle {
    let line_width = if is_own_track {
        OWN_LINE_WIDTH
    } else {
        OTHER_LINE_WIDTH
    };

    if state == TrackState::Recording {
        return SegmentStyle {
            color: RECORDING_COLOR,
            line_width,
        };
    }

    if is_own_track {
        let alpha = (1.0 - ALPHA_STEP * color_index as f32).max(MIN_ALPHA);
        SegmentStyle {
            color: OWN_TRACK_COLOR.with_alpha(alpha),
            line_width,
        }
    } else {
        SegmentStyle {
            color: OTHER_TRACK_COLOR,
            line_width,
        }
    }
}

/// A segment paired with its render style.
#[derive(Debug, Clone, PartialEq)]
pub struct StyledSegment {
    pub segment: TrackSegment,
    pub style: SegmentStyle,
}

// ============================================================================
// Annotation Registry
// ============================================================================

#[derive(Debug, Clone)]
struct Annotation {
    color_index: u32,
    segments: Vec<StyledSegment>,
}

/// Styled segments for every track currently shown on the map.
///
/// A track's color index is handed out from a monotonically increasing
/// counter the first time the track is added and kept across updates.
#[derive(Debug, Default)]
pub struct AnnotationRegistry {
    next_color_index: u32,
    annotations: HashMap<TrackId, Annotation>,
}

impl AnnotationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a track, or rebuild its segments if it is already shown.
    pub fn upsert(&mut self, id: TrackId, track: &Track, is_own_track: bool) -> &[StyledSegment] {
        let color_index = match self.annotations.get(&id) {
            Some(existing) => existing.color_index,
            None => {
                let index = self.next_color_index;
                self.next_color_index += 1;
                index
            }
        };

        let segments = segment_track(id, track, color_index)
            .into_iter()
            .map(|segment| StyledSegment {
                style: style_for_segment(is_own_track, color_index, track.state),
                segment,
            })
            .collect();

        let annotation = self.annotations.entry(id).or_insert(Annotation {
            color_index,
            segments: Vec::new(),
        });
        annotation.segments = segments;
        &annotation.segments
    }

    pub fn remove(&mut self, id: TrackId) -> bool {
        self.annotations.remove(&id).is_some()
    }

    /// Drop all annotations. Color indices keep counting up.
    pub fn clear(&mut self) {
        self.annotations.clear();
    }

    pub fn segments(&self, id: TrackId) -> Option<&[StyledSegment]> {
        self.annotations.get(&id).map(|a| a.segments.as_slice())
    }

    pub fn color_index(&self, id: TrackId) -> Option<u32> {
        self.annotations.get(&id).map(|a| a.color_index)
    }

    pub fn track_ids(&self) -> Vec<TrackId> {
        let mut ids: Vec<TrackId> = self.annotations.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
