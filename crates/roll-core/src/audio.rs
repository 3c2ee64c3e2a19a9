//! Audio pipeline coordinator
//!
//! Picks between tab-capture streams and element-sourced audio per tab:
//!
//! ```text
//! idle ──create──▶ creating ──ok──▶ stream | element ──reset──▶ idle
//!                      │
//!                      └─fail─▶ fallback ──fail──▶ idle (AUDIO_FAILED)
//! ```
//!
//! At most one creation is in flight per tab. Concurrent callers share the
//! outcome of that creation through a `watch` channel. A reset while a
//! creation is in flight makes its result stale; stale results are dropped.

use crate::config::RollConfig;
use crate::host::CaptureBackend;
use crate::message::{Outbound, Outbox};
use crate::types::{AudioMode, StreamHandle, TabId};
use crate::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

/// User-facing message sent when both strategies failed
pub const DEFAULT_FAILURE_MESSAGE: &str =
    "Audio capture failed; switch the audio capture mode in settings and retry";

/// Outcome slot shared with callers joining an in-flight creation
type Pending = watch::Receiver<Option<Option<AudioMode>>>;

type TabMap = HashMap<TabId, TabAudio>;

/// Snapshot of one tab's pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioPipelineState {
    pub mode: Option<AudioMode>,
    /// A creation is in flight
    pub creating: bool,
    pub stream: Option<StreamHandle>,
}

struct TabAudio {
    mode: Option<AudioMode>,
    stream: Option<StreamHandle>,
    /// Creation attempt that owns this record
    generation: u64,
    pending: Option<Pending>,
}

/// In-flight marker for one creation
///
/// Dropping it releases the tab's in-flight slot, so a creation whose
/// caller went away does not block later ones.
struct InFlight<'a> {
    tabs: &'a Mutex<TabMap>,
    tab: TabId,
    generation: u64,
    outcome: watch::Sender<Option<Option<AudioMode>>>,
}

impl InFlight<'_> {
    fn settle(self, result: Option<AudioMode>) {
        let _ = self.outcome.send(Some(result));
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut tabs = lock(self.tabs);
        let owned = tabs
            .get(&self.tab)
            .is_some_and(|audio| audio.generation == self.generation && audio.pending.is_some());
        if !owned {
            return;
        }
        debug!(tab = %self.tab, generation = self.generation, "Audio creation abandoned");
        release(&mut tabs, self.tab);
    }
}

fn lock(tabs: &Mutex<TabMap>) -> MutexGuard<'_, TabMap> {
    tabs.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clear the in-flight slot; a record left without a pipeline is removed
fn release(tabs: &mut TabMap, tab: TabId) {
    let empty = match tabs.get_mut(&tab) {
        Some(audio) => {
            audio.pending = None;
            audio.mode.is_none()
        }
        None => false,
    };
    if empty {
        tabs.remove(&tab);
    }
}

/// Per-tab audio coordinator
pub struct AudioCoordinator {
    backend: Arc<dyn CaptureBackend>,
    outbox: Outbox,
    tabs: Mutex<TabMap>,
    generations: AtomicU64,
    failure_message: String,
}

impl AudioCoordinator {
    pub fn new(backend: Arc<dyn CaptureBackend>, outbox: Outbox) -> Self {
        Self {
            backend,
            outbox,
            tabs: Mutex::new(HashMap::new()),
            generations: AtomicU64::new(0),
            failure_message: DEFAULT_FAILURE_MESSAGE.to_string(),
        }
    }

    /// Override the `AUDIO_FAILED` message
    pub fn with_failure_message(mut self, message: impl Into<String>) -> Self {
        self.failure_message = message.into();
        self
    }

    /// Current state of `tab`; the initial state when none is recorded
    pub async fn state(&self, tab: TabId) -> AudioPipelineState {
        self.tabs()
            .get(&tab)
            .map(|audio| AudioPipelineState {
                mode: audio.mode,
                creating: audio.pending.is_some(),
                stream: audio.stream.clone(),
            })
            .unwrap_or_default()
    }

    pub async fn mode(&self, tab: TabId) -> Option<AudioMode> {
        self.tabs().get(&tab).and_then(|audio| audio.mode)
    }

    /// Build the pipeline for `tab` in `mode`
    ///
    /// Returns the mode that ended up active, or `None` when every allowed
    /// strategy failed. A call made while a creation is in flight waits for
    /// that creation and returns its outcome.
    #[instrument(skip(self, config))]
    pub async fn create(
        &self,
        tab: TabId,
        mode: AudioMode,
        fallback_on_fail: bool,
        config: &RollConfig,
    ) -> Option<AudioMode> {
        let claimed = {
            let mut tabs = self.tabs();
            match tabs.get(&tab).and_then(|audio| audio.pending.clone()) {
                Some(pending) => Err(pending),
                None => {
                    let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
                    let (outcome, rx) = watch::channel(None);
                    let audio = tabs.entry(tab).or_insert_with(|| TabAudio {
                        mode: None,
                        stream: None,
                        generation,
                        pending: None,
                    });
                    audio.generation = generation;
                    audio.pending = Some(rx);
                    Ok(InFlight {
                        tabs: &self.tabs,
                        tab,
                        generation,
                        outcome,
                    })
                }
            }
        };
        let in_flight = match claimed {
            Ok(in_flight) => in_flight,
            Err(pending) => {
                debug!(tab = %tab, "Joining in-flight audio creation");
                return self.join(tab, pending).await;
            }
        };

        let built = self.build(tab, mode, fallback_on_fail).await;

        let result = {
            let mut tabs = self.tabs();
            let current = tabs
                .get(&tab)
                .is_some_and(|audio| audio.generation == in_flight.generation);

            if !current {
                debug!(tab = %tab, generation = in_flight.generation, "Stale audio creation discarded");
                tabs.get(&tab).and_then(|audio| audio.mode)
            } else {
                match built {
                    Some((mode, stream)) => {
                        if let Some(audio) = tabs.get_mut(&tab) {
                            audio.pending = None;
                            audio.mode = Some(mode);
                            audio.stream = stream.clone();
                        }
                        self.announce(tab, mode, stream, config);
                        info!(tab = %tab, mode = %mode, "Audio pipeline ready");
                        Some(mode)
                    }
                    None => {
                        release(&mut tabs, tab);
                        self.outbox.publish(Outbound::AudioFailed {
                            tab_id: tab,
                            message: self.failure_message.clone(),
                        });
                        warn!(tab = %tab, "Audio pipeline failed");
                        None
                    }
                }
            }
        };

        in_flight.settle(result);
        result
    }

    /// Re-send the current settings to the active pipeline
    ///
    /// Creates the pipeline when none exists and re-creates a stream
    /// pipeline whose capture handle was lost.
    #[instrument(skip(self, config))]
    pub async fn update(&self, tab: TabId, config: &RollConfig) -> Option<AudioMode> {
        let (mode, stream) = {
            let tabs = self.tabs();
            match tabs.get(&tab) {
                Some(audio) => (audio.mode, audio.stream.clone()),
                None => (None, None),
            }
        };

        let surface_alive = match mode {
            Some(AudioMode::Stream) => self.backend.has_capture_surface().await,
            _ => false,
        };

        match (mode, stream) {
            (None, _) => self.create(tab, AudioMode::Stream, true, config).await,
            (Some(AudioMode::Stream), Some(stream)) if surface_alive => {
                self.outbox.publish(Outbound::UpdateStreamAudio {
                    tab_id: tab,
                    stream,
                    config: config.clone(),
                });
                Some(AudioMode::Stream)
            }
            (Some(AudioMode::Stream), _) => {
                info!(tab = %tab, "Capture handle lost, recreating");
                self.create(tab, AudioMode::Stream, true, config).await
            }
            (Some(AudioMode::Element), _) => {
                self.outbox.publish(Outbound::UpdateElementAudio {
                    tab_id: tab,
                    config: config.clone(),
                });
                Some(AudioMode::Element)
            }
        }
    }

    /// Tear down the active pipeline; returns false when nothing was active
    #[instrument(skip(self))]
    pub async fn reset(&self, tab: TabId) -> bool {
        let removed = self.tabs().remove(&tab);
        let Some(audio) = removed else {
            return false;
        };

        match audio.mode {
            Some(AudioMode::Stream) => {
                self.outbox.publish(Outbound::ResetAudio { tab_id: tab });
                self.outbox.publish(Outbound::DeleteAudio { tab_id: tab });
            }
            Some(AudioMode::Element) => {
                self.outbox.publish(Outbound::ResetAudio { tab_id: tab });
            }
            None => {}
        }
        info!(tab = %tab, mode = ?audio.mode, "Audio pipeline reset");
        audio.mode.is_some() || audio.pending.is_some()
    }

    /// Forget the capture handle of `tab`, as when the capture context drops it
    pub async fn invalidate_stream(&self, tab: TabId) {
        if let Some(audio) = self.tabs().get_mut(&tab) {
            audio.stream = None;
        }
    }

    /// Number of tabs with audio state
    pub async fn tab_count(&self) -> usize {
        self.tabs().len()
    }

    fn tabs(&self) -> MutexGuard<'_, TabMap> {
        lock(&self.tabs)
    }

    async fn join(&self, tab: TabId, mut pending: Pending) -> Option<AudioMode> {
        let settled = pending
            .wait_for(Option::is_some)
            .await
            .map(|outcome| (*outcome).flatten());
        match settled {
            Ok(mode) => mode,
            Err(_) => self.mode(tab).await,
        }
    }

    /// Try `mode`, then the other strategy when allowed
    async fn build(
        &self,
        tab: TabId,
        mode: AudioMode,
        fallback_on_fail: bool,
    ) -> Option<(AudioMode, Option<StreamHandle>)> {
        let err = match self.construct(tab, mode).await {
            Ok(stream) => return Some((mode, stream)),
            Err(err) => err,
        };
        warn!(tab = %tab, mode = %mode, error = %err, code = err.error_code(), "Audio strategy failed");
        if !fallback_on_fail {
            return None;
        }

        let fallback = mode.other();
        match self.construct(tab, fallback).await {
            Ok(stream) => {
                info!(tab = %tab, from = %mode, to = %fallback, "Audio fell back");
                Some((fallback, stream))
            }
            Err(err) => {
                warn!(tab = %tab, mode = %fallback, error = %err, "Audio fallback failed");
                None
            }
        }
    }

    async fn construct(&self, tab: TabId, mode: AudioMode) -> Result<Option<StreamHandle>> {
        match mode {
            AudioMode::Stream => {
                if !self.backend.has_capture_surface().await {
                    self.backend.create_capture_surface().await?;
                }
                let stream = self.backend.acquire_stream(tab).await?;
                Ok(Some(stream))
            }
            // built inside the page; nothing to acquire here
            AudioMode::Element => Ok(None),
        }
    }

    fn announce(&self, tab: TabId, mode: AudioMode, stream: Option<StreamHandle>, config: &RollConfig) {
        let message = match (mode, stream) {
            (AudioMode::Stream, Some(stream)) => Outbound::UpdateStreamAudio {
                tab_id: tab,
                stream,
                config: config.clone(),
            },
            _ => Outbound::UpdateElementAudio {
                tab_id: tab,
                config: config.clone(),
            },
        };
        self.outbox.publish(message);
    }
}
