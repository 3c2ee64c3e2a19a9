//! Core types for Roll

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Browser tab identifier; every session and audio record is keyed by it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub u32);

impl std::fmt::Display for TabId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for TabId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Stable media identifier, stamped on the element as `data-roll-id`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaId(pub String);

impl MediaId {
    /// Generate a fresh identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MediaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MediaId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Opaque handle of a live capture stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamHandle(pub String);

impl std::fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Element attribute names stamped by the scanner and the session
pub mod attr {
    pub const ROLL_ID: &str = "data-roll-id";
    pub const ROLL_CHECK: &str = "data-roll-check";
    pub const ROLL_VISIBLE: &str = "data-roll-visible";
    pub const ROLL_ACTIVE: &str = "data-roll";
}

/// Width/height pair in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: f64,
    pub height: f64,
}

impl Dimensions {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Wider than tall
    pub fn is_landscape(&self) -> bool {
        self.width > self.height
    }

    /// True when either side is strictly smaller than `other`
    pub fn is_smaller_than(&self, other: &Dimensions) -> bool {
        self.width < other.width || self.height < other.height
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Point-in-time playback state of a media element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSnapshot {
    pub current_time: f64,
    pub duration: f64,
    pub paused: bool,
    pub ended: bool,
    /// HTMLMediaElement readyState (0 = HAVE_NOTHING .. 4 = HAVE_ENOUGH_DATA)
    pub ready_state: u8,
    pub muted: bool,
    pub looping: bool,
    pub playback_rate: f64,
    /// Rendered box size (offsetWidth/offsetHeight)
    pub rendered: Dimensions,
    /// Intrinsic video size (videoWidth/videoHeight)
    pub intrinsic: Dimensions,
    pub picture_in_picture: bool,
}

impl Default for PlaybackSnapshot {
    fn default() -> Self {
        Self {
            current_time: 0.0,
            duration: 0.0,
            paused: true,
            ended: false,
            ready_state: 0,
            muted: false,
            looping: false,
            playback_rate: 1.0,
            rendered: Dimensions::default(),
            intrinsic: Dimensions::default(),
            picture_in_picture: false,
        }
    }
}

impl PlaybackSnapshot {
    /// Loaded but never started: `currentTime == 0 && paused`
    pub fn is_stalled(&self) -> bool {
        self.current_time == 0.0 && self.paused
    }

    /// Time is moving forward: `currentTime > 0 && !paused`
    pub fn is_advancing(&self) -> bool {
        self.current_time > 0.0 && !self.paused
    }

    /// Playing, not ended, has data and has progressed
    pub fn is_actively_playing(&self) -> bool {
        self.is_advancing() && !self.ended && self.ready_state > 0
    }

    /// Progress in percent; 0 when the duration is unknown
    pub fn percentage(&self) -> f64 {
        if self.duration > 0.0 && self.duration.is_finite() {
            self.current_time / self.duration * 100.0
        } else {
            0.0
        }
    }
}

/// Audio capture strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioMode {
    /// Tab capture stream processed by the capture surface
    Stream,
    /// Signal built from the media element inside the page
    Element,
}

impl AudioMode {
    /// The other strategy, used for fallback
    pub fn other(self) -> Self {
        match self {
            AudioMode::Stream => AudioMode::Element,
            AudioMode::Element => AudioMode::Stream,
        }
    }
}

impl std::fmt::Display for AudioMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioMode::Stream => write!(f, "stream"),
            AudioMode::Element => write!(f, "element"),
        }
    }
}

/// Summary of one candidate, as shown in the badge/video list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaSummary {
    pub id: MediaId,
    pub name: String,
    pub src: String,
    pub poster_url: String,
    pub checked: bool,
    pub visible: bool,
    pub is_real: bool,
    pub duration: f64,
    pub current_time: f64,
    pub percentage: f64,
    pub paused: bool,
}
