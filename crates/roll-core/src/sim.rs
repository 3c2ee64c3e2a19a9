//! In-memory host
//!
//! Implements the host seams without a browser: documents hold media
//! elements and frames, elements keep a mutable playback snapshot and count
//! their attached listeners, and the capture backend can be told to fail or
//! to answer slowly. Used by the replay CLI, the benchmarks and the tests.

use crate::error::{Error, Result};
use crate::host::{
    CaptureBackend, DocumentRef, DocumentTree, EventKind, Frame, ListenerKey, MediaElement, MediaRef,
};
use crate::site::VideoSelector;
use crate::types::{Dimensions, PlaybackSnapshot, StreamHandle, TabId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct MediaState {
    snapshot: PlaybackSnapshot,
    attributes: HashMap<String, String>,
    source: Option<String>,
    poster: Option<String>,
    tags: Vec<String>,
    listeners: HashMap<EventKind, Vec<ListenerKey>>,
    next_key: u64,
    seeks: Vec<f64>,
    plays: usize,
}

/// Simulated media element
#[derive(Default)]
pub struct SimMedia {
    state: Mutex<MediaState>,
}

impl SimMedia {
    /// Loaded element (`readyState = 4`), paused at 0, same rendered and
    /// intrinsic size
    pub fn new(width: f64, height: f64) -> Self {
        let media = Self::default();
        media.update(|s| {
            s.ready_state = 4;
            s.duration = 120.0;
            s.rendered = Dimensions::new(width, height);
            s.intrinsic = Dimensions::new(width, height);
        });
        media
    }

    pub fn with_source(self, src: impl Into<String>) -> Self {
        lock(&self.state).source = Some(src.into());
        self
    }

    pub fn with_poster(self, poster: impl Into<String>) -> Self {
        lock(&self.state).poster = Some(poster.into());
        self
    }

    /// Extra selector this element matches besides `video`
    pub fn with_tag(self, tag: impl Into<String>) -> Self {
        lock(&self.state).tags.push(tag.into());
        self
    }

    pub fn with_snapshot(self, f: impl FnOnce(&mut PlaybackSnapshot)) -> Self {
        self.update(f);
        self
    }

    /// Mutate the playback snapshot in place
    pub fn update(&self, f: impl FnOnce(&mut PlaybackSnapshot)) {
        f(&mut lock(&self.state).snapshot);
    }

    /// Playing at `current_time`
    pub fn start_playing(&self, current_time: f64) {
        self.update(|s| {
            s.paused = false;
            s.current_time = current_time;
        });
    }

    pub fn set_current_time(&self, current_time: f64) {
        self.update(|s| s.current_time = current_time);
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        lock(&self.state).listeners.get(&kind).map(Vec::len).unwrap_or(0)
    }

    pub fn total_listeners(&self) -> usize {
        lock(&self.state).listeners.values().map(Vec::len).sum()
    }

    /// Every position passed to `seek`, in order
    pub fn seeks(&self) -> Vec<f64> {
        lock(&self.state).seeks.clone()
    }

    pub fn play_count(&self) -> usize {
        lock(&self.state).plays
    }

    fn matches(&self, selector: &VideoSelector) -> bool {
        selector.default_dom == "video"
            || lock(&self.state).tags.iter().any(|t| *t == selector.default_dom)
    }
}

impl MediaElement for SimMedia {
    fn snapshot(&self) -> PlaybackSnapshot {
        lock(&self.state).snapshot.clone()
    }

    fn attribute(&self, name: &str) -> Option<String> {
        lock(&self.state).attributes.get(name).cloned()
    }

    fn set_attribute(&self, name: &str, value: &str) {
        lock(&self.state)
            .attributes
            .insert(name.to_string(), value.to_string());
    }

    fn source(&self) -> Option<String> {
        lock(&self.state).source.clone()
    }

    fn poster(&self) -> Option<String> {
        lock(&self.state).poster.clone()
    }

    fn seek(&self, seconds: f64) {
        let mut state = lock(&self.state);
        state.seeks.push(seconds);
        state.snapshot.current_time = seconds;
    }

    fn play(&self) {
        let mut state = lock(&self.state);
        state.plays += 1;
        state.snapshot.paused = false;
        state.snapshot.ended = false;
    }

    fn set_playback_rate(&self, rate: f64) {
        lock(&self.state).snapshot.playback_rate = rate;
    }

    fn set_looping(&self, looping: bool) {
        lock(&self.state).snapshot.looping = looping;
    }

    fn listen(&self, kind: EventKind) -> ListenerKey {
        let mut state = lock(&self.state);
        state.next_key += 1;
        let key = ListenerKey(state.next_key);
        state.listeners.entry(kind).or_default().push(key);
        key
    }

    fn unlisten(&self, kind: EventKind, key: ListenerKey) {
        let mut state = lock(&self.state);
        if let Some(keys) = state.listeners.get_mut(&kind) {
            keys.retain(|k| *k != key);
            if keys.is_empty() {
                state.listeners.remove(&kind);
            }
        }
    }
}

enum SimFrame {
    Open { src: String, document: Arc<SimDocument> },
    CrossOrigin { src: String },
}

/// Simulated page or frame document
#[derive(Default)]
pub struct SimDocument {
    title: Mutex<String>,
    media: Mutex<Vec<Arc<SimMedia>>>,
    frames: Mutex<Vec<SimFrame>>,
}

impl SimDocument {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: Mutex::new(title.into()),
            ..Default::default()
        }
    }

    pub fn set_title(&self, title: impl Into<String>) {
        *lock(&self.title) = title.into();
    }

    pub fn add_media(&self, media: Arc<SimMedia>) {
        lock(&self.media).push(media);
    }

    /// Remove an element; returns false when it was not attached here
    pub fn remove_media(&self, media: &Arc<SimMedia>) -> bool {
        let mut list = lock(&self.media);
        let before = list.len();
        list.retain(|m| !Arc::ptr_eq(m, media));
        list.len() != before
    }

    pub fn add_frame(&self, src: impl Into<String>, document: Arc<SimDocument>) {
        lock(&self.frames).push(SimFrame::Open {
            src: src.into(),
            document,
        });
    }

    pub fn add_cross_origin_frame(&self, src: impl Into<String>) {
        lock(&self.frames).push(SimFrame::CrossOrigin { src: src.into() });
    }
}

impl DocumentTree for SimDocument {
    fn title(&self) -> String {
        lock(&self.title).clone()
    }

    fn query_media(&self, selector: &VideoSelector) -> Vec<MediaRef> {
        lock(&self.media)
            .iter()
            .filter(|m| m.matches(selector))
            .map(|m| m.clone() as MediaRef)
            .collect()
    }

    fn media_count(&self) -> usize {
        lock(&self.media).len()
    }

    fn frames(&self) -> Vec<Frame> {
        lock(&self.frames)
            .iter()
            .map(|frame| match frame {
                SimFrame::Open { src, document } => Frame {
                    src: src.clone(),
                    content: Ok(document.clone() as DocumentRef),
                },
                SimFrame::CrossOrigin { src } => Frame {
                    src: src.clone(),
                    content: Err(Error::CrossOriginDocument { origin: src.clone() }),
                },
            })
            .collect()
    }
}

/// Simulated capture context
#[derive(Default)]
pub struct SimCapture {
    surface_fails: AtomicBool,
    stream_fails: AtomicBool,
    surface_alive: AtomicBool,
    surfaces_created: AtomicUsize,
    streams_acquired: AtomicUsize,
    latency: Mutex<Option<Duration>>,
}

impl SimCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend whose stream requests always fail
    pub fn failing_stream() -> Self {
        let capture = Self::default();
        capture.set_stream_fails(true);
        capture
    }

    pub fn set_surface_fails(&self, fails: bool) {
        self.surface_fails.store(fails, Ordering::SeqCst);
    }

    pub fn set_stream_fails(&self, fails: bool) {
        self.stream_fails.store(fails, Ordering::SeqCst);
    }

    /// Delay applied to every stream request
    pub fn set_latency(&self, latency: Option<Duration>) {
        *lock(&self.latency) = latency;
    }

    /// Drop the capture surface, as the browser may do at any time
    pub fn close_surface(&self) {
        self.surface_alive.store(false, Ordering::SeqCst);
    }

    pub fn surfaces_created(&self) -> usize {
        self.surfaces_created.load(Ordering::SeqCst)
    }

    pub fn streams_acquired(&self) -> usize {
        self.streams_acquired.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureBackend for SimCapture {
    async fn has_capture_surface(&self) -> bool {
        self.surface_alive.load(Ordering::SeqCst)
    }

    async fn create_capture_surface(&self) -> Result<()> {
        if self.surface_fails.load(Ordering::SeqCst) {
            return Err(Error::capture("surface creation refused"));
        }
        self.surfaces_created.fetch_add(1, Ordering::SeqCst);
        self.surface_alive.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn acquire_stream(&self, tab: TabId) -> Result<StreamHandle> {
        let latency = *lock(&self.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.stream_fails.load(Ordering::SeqCst) {
            return Err(Error::stream(tab, "capture not permitted"));
        }
        let n = self.streams_acquired.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(StreamHandle(format!("stream-{}-{}", tab, n)))
    }
}
