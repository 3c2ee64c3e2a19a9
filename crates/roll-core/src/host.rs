//! Host seams
//!
//! The core never touches a real DOM or a real capture API. Pages, frames,
//! media elements and the capture surface are reached through these traits;
//! the browser glue implements them, `crate::sim` implements them in memory.

use crate::error::Result;
use crate::site::VideoSelector;
use crate::types::{PlaybackSnapshot, StreamHandle, TabId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Host event a listener can be attached for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// `timeupdate`
    TimeUpdate,
    /// `play`
    Play,
    /// `ratechange`
    RateChange,
    /// mutation of the `loop` attribute
    LoopAttribute,
    /// picture-in-picture enter/leave
    PictureInPicture,
    /// viewport intersection change
    Visibility,
    /// site ad-signal class change
    AdState,
}

/// Event delivered by the host for a media element
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MediaEvent {
    TimeUpdate,
    Play,
    RateChange,
    LoopAttribute,
    PictureInPicture { active: bool },
    Visibility { visible: bool },
    AdState { showing: bool },
}

impl MediaEvent {
    /// Listener kind this event is dispatched to
    pub fn kind(&self) -> EventKind {
        match self {
            MediaEvent::TimeUpdate => EventKind::TimeUpdate,
            MediaEvent::Play => EventKind::Play,
            MediaEvent::RateChange => EventKind::RateChange,
            MediaEvent::LoopAttribute => EventKind::LoopAttribute,
            MediaEvent::PictureInPicture { .. } => EventKind::PictureInPicture,
            MediaEvent::Visibility { .. } => EventKind::Visibility,
            MediaEvent::AdState { .. } => EventKind::AdState,
        }
    }
}

/// Host-issued token for an attached listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerKey(pub u64);

/// One media element in a page or frame
pub trait MediaElement: Send + Sync {
    /// Current playback state
    fn snapshot(&self) -> PlaybackSnapshot;

    fn attribute(&self, name: &str) -> Option<String>;

    fn set_attribute(&self, name: &str, value: &str);

    /// `src`, or the first `<source>` child's `src`
    fn source(&self) -> Option<String>;

    fn poster(&self) -> Option<String>;

    fn seek(&self, seconds: f64);

    /// Resume playback; rejections are swallowed by the host
    fn play(&self);

    fn set_playback_rate(&self, rate: f64);

    fn set_looping(&self, looping: bool);

    /// Attach a host listener for `kind`
    fn listen(&self, kind: EventKind) -> ListenerKey;

    /// Detach a listener previously returned by `listen`
    fn unlisten(&self, kind: EventKind, key: ListenerKey);
}

pub type MediaRef = Arc<dyn MediaElement>;

pub type DocumentRef = Arc<dyn DocumentTree>;

/// A nested frame as seen from its parent document
pub struct Frame {
    /// Frame `src` attribute
    pub src: String,
    /// Frame document, `Err(CrossOriginDocument)` when it cannot be inspected
    pub content: Result<DocumentRef>,
}

/// A page or frame document
pub trait DocumentTree: Send + Sync {
    fn title(&self) -> String;

    /// Elements matching `selector`, in document order
    fn query_media(&self, selector: &VideoSelector) -> Vec<MediaRef>;

    /// Number of `<video>` elements regardless of selector
    fn media_count(&self) -> usize;

    /// Direct child frames
    fn frames(&self) -> Vec<Frame>;
}

/// The context that owns tab capture
///
/// Every call is a message round-trip to that context.
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Whether the shared capture surface is alive
    async fn has_capture_surface(&self) -> bool;

    /// Create the shared capture surface
    async fn create_capture_surface(&self) -> Result<()>;

    /// Request a capture stream handle for `tab`
    async fn acquire_stream(&self, tab: TabId) -> Result<StreamHandle>;
}
