//! Roll engine - message dispatch for every tab
//!
//! Owns the session store, the audio coordinator, the rescan scheduler and
//! the outbox. Inbound messages are matched exhaustively; every outcome is
//! published as a notification except the `AUDIO_CREATE` reply, which is
//! returned to the caller.

use crate::{
    ad_skip::AD_PLAYBACK_RATE,
    audio::{AudioCoordinator, DEFAULT_FAILURE_MESSAGE},
    config::PersistedState,
    host::{CaptureBackend, DocumentRef},
    message::{Inbound, NotificationRecord, Outbound, Outbox},
    scanner::{Scanner, MAX_FRAME_DEPTH},
    scheduler::{RescanScheduler, DEFAULT_DEBOUNCE},
    session::{RescanReport, Session},
    store::SessionStore,
    types::TabId,
    Error, Result,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// Engine tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Debounce window for mutation-triggered rescans (ms)
    pub debounce_ms: u64,
    /// Playback rate while an ad is showing
    pub ad_playback_rate: f64,
    /// Deepest nested frame visited by scans
    pub max_frame_depth: usize,
    /// Message carried by `AUDIO_FAILED`
    pub audio_failure_message: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE.as_millis() as u64,
            ad_playback_rate: AD_PLAYBACK_RATE,
            max_frame_depth: MAX_FRAME_DEPTH,
            audio_failure_message: DEFAULT_FAILURE_MESSAGE.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Receivers handed out by [`RollEngine::new`]
pub struct EngineChannels {
    /// Every published notification
    pub notifications: mpsc::UnboundedReceiver<NotificationRecord>,
    /// Tabs whose debounced rescan is due
    pub rescans: mpsc::UnboundedReceiver<TabId>,
}

/// Core engine
pub struct RollEngine {
    config: EngineConfig,
    sessions: SessionStore,
    audio: AudioCoordinator,
    scheduler: RescanScheduler,
    outbox: Outbox,
}

impl RollEngine {
    /// Create an engine on top of a capture backend
    pub fn new(config: EngineConfig, backend: Arc<dyn CaptureBackend>) -> (Self, EngineChannels) {
        let (outbox, notifications) = Outbox::new();
        let (scheduler, rescans) = RescanScheduler::new(config.debounce());
        let audio = AudioCoordinator::new(backend, outbox.clone())
            .with_failure_message(config.audio_failure_message.clone());

        info!(
            debounce_ms = config.debounce_ms,
            ad_rate = config.ad_playback_rate,
            "Roll engine created"
        );

        (
            Self {
                config,
                sessions: SessionStore::new(),
                audio,
                scheduler,
                outbox,
            },
            EngineChannels {
                notifications,
                rescans,
            },
        )
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn audio(&self) -> &AudioCoordinator {
        &self.audio
    }

    pub fn scheduler(&self) -> &RescanScheduler {
        &self.scheduler
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Start tracking a tab and run its first scan
    ///
    /// A session already registered for the tab is closed first.
    #[instrument(skip(self, root, persisted))]
    pub async fn open_tab(
        &self,
        tab: TabId,
        root: DocumentRef,
        persisted: &PersistedState,
    ) -> Result<Option<RescanReport>> {
        if self.sessions.contains(tab).await {
            self.close_tab(tab).await;
        }

        let config = persisted.resolve(tab);
        let enabled = config.enable;
        let session = Session::new(tab, root, config)
            .with_ad_rate(self.config.ad_playback_rate)
            .with_scanner(Scanner::with_max_depth(self.config.max_frame_depth));
        self.sessions.insert(session).await;
        info!(tab = %tab, enabled, url = %persisted.url, "Tab opened");

        if !enabled {
            return Ok(None);
        }
        self.rescan(tab).await.map(Some)
    }

    /// Tear a tab down; every step runs even when the session is unknown
    ///
    /// Returns true when a session was registered.
    #[instrument(skip(self))]
    pub async fn close_tab(&self, tab: TabId) -> bool {
        let timer = self.scheduler.cancel(tab);
        let (listeners, open_secs) = match self.sessions.remove(tab).await {
            Some(mut session) => (
                Some(session.teardown()),
                Some(session.open_for().num_seconds()),
            ),
            None => (None, None),
        };
        let audio = self.audio.reset(tab).await;

        info!(
            tab = %tab,
            timer,
            listeners = ?listeners,
            open_secs = ?open_secs,
            audio,
            "Tab closed"
        );
        listeners.is_some()
    }

    /// Rescan a tab now and publish its badge
    pub async fn rescan(&self, tab: TabId) -> Result<RescanReport> {
        let (report, summaries) = self
            .sessions
            .with_mut(tab, |session| {
                session.rescan().map(|report| (report, session.summaries()))
            })
            .await??;

        self.outbox.publish(Outbound::BadgeUpdate {
            tab_id: tab,
            count: summaries.len(),
            summaries,
        });
        Ok(report)
    }

    /// Handle one inbound message
    ///
    /// Returns the reply for request/response messages.
    #[instrument(skip(self, message), fields(kind = message.name(), tab = %message.tab()))]
    pub async fn handle(&self, message: Inbound) -> Result<Option<Outbound>> {
        match message {
            Inbound::RequestRescan { tab_id } => {
                self.scheduler.cancel(tab_id);
                self.rescan(tab_id).await?;
                Ok(None)
            }

            Inbound::ConfigUpdated { tab_id, config } => {
                let (diff, snapshot) = self
                    .sessions
                    .with_mut(tab_id, |session| {
                        session.apply_config(config).map(|diff| (diff, session.config()))
                    })
                    .await??;

                if diff.enabled || diff.selector {
                    self.scheduler.schedule(tab_id);
                }
                if diff.audio && self.audio.mode(tab_id).await.is_some() {
                    self.audio.update(tab_id, &snapshot).await;
                }
                self.outbox.publish(Outbound::StorageUpdated {
                    tab_id,
                    config: (*snapshot).clone(),
                });
                Ok(None)
            }

            Inbound::AudioCreate {
                tab_id,
                mode,
                fallback_on_fail,
                config,
            } => {
                let result = self.audio.create(tab_id, mode, fallback_on_fail, &config).await;
                Ok(Some(Outbound::AudioModeResult {
                    tab_id,
                    mode: result,
                }))
            }

            Inbound::AudioUpdate { tab_id, config } => {
                self.audio.update(tab_id, &config).await;
                Ok(None)
            }

            Inbound::AudioReset { tab_id } => {
                self.audio.reset(tab_id).await;
                Ok(None)
            }

            Inbound::VideoCheckUpdate { tab_id, ids } => {
                let (snapshot, summaries) = self
                    .sessions
                    .with_mut(tab_id, |session| {
                        session
                            .set_checked(&ids)
                            .map(|_| (session.config(), session.summaries()))
                    })
                    .await??;

                self.outbox.publish(Outbound::StorageUpdated {
                    tab_id,
                    config: (*snapshot).clone(),
                });
                self.outbox.publish(Outbound::BadgeUpdate {
                    tab_id,
                    count: summaries.len(),
                    summaries,
                });
                Ok(None)
            }

            Inbound::DocumentMutated { tab_id, mutations } => {
                if !self.sessions.contains(tab_id).await {
                    return Err(Error::SessionNotFound(tab_id));
                }
                let relevant = mutations.iter().filter(|m| m.is_media_change()).count();
                if relevant > 0 {
                    self.scheduler.schedule(tab_id);
                }
                debug!(tab = %tab_id, total = mutations.len(), relevant, "Mutations received");
                Ok(None)
            }

            Inbound::MediaEvent {
                tab_id,
                media_id,
                event,
            } => {
                let (outcome, snapshot, summaries) = self
                    .sessions
                    .with_mut(tab_id, |session| {
                        session
                            .handle_media_event(&media_id, event)
                            .map(|outcome| (outcome, session.config(), session.summaries()))
                    })
                    .await??;

                if outcome.storage {
                    self.outbox.publish(Outbound::StorageUpdated {
                        tab_id,
                        config: (*snapshot).clone(),
                    });
                }
                if outcome.badge || outcome.real_changed {
                    self.outbox.publish(Outbound::BadgeUpdate {
                        tab_id,
                        count: summaries.len(),
                        summaries,
                    });
                }
                Ok(None)
            }

            Inbound::Disable { tab_id } => {
                self.scheduler.cancel(tab_id);
                let config = self.sessions.with_mut(tab_id, |session| session.disable()).await?;
                self.audio.reset(tab_id).await;
                self.outbox.publish(Outbound::Disabled {
                    tab_id,
                    config: (*config).clone(),
                });
                Ok(None)
            }

            Inbound::TabClosed { tab_id } => {
                self.close_tab(tab_id).await;
                Ok(None)
            }
        }
    }

    /// Handle a message, logging instead of returning errors
    pub async fn dispatch(&self, message: Inbound) -> Option<Outbound> {
        let kind = message.name();
        let tab = message.tab();
        match self.handle(message).await {
            Ok(reply) => reply,
            Err(err) if err.is_recoverable() => {
                debug!(tab = %tab, kind, code = err.error_code(), error = %err, "Message skipped");
                None
            }
            Err(err) => {
                warn!(tab = %tab, kind, code = err.error_code(), error = %err, "Message failed");
                None
            }
        }
    }

    /// Run every rescan that is already due; returns how many ran
    pub async fn run_due_rescans(&self, rescans: &mut mpsc::UnboundedReceiver<TabId>) -> usize {
        let mut ran = 0;
        while let Ok(tab) = rescans.try_recv() {
            self.run_rescan(tab).await;
            ran += 1;
        }
        ran
    }

    /// Run debounced rescans until the scheduler goes away
    pub async fn run(&self, mut rescans: mpsc::UnboundedReceiver<TabId>) {
        while let Some(tab) = rescans.recv().await {
            self.run_rescan(tab).await;
        }
        debug!("Rescan loop finished");
    }

    async fn run_rescan(&self, tab: TabId) {
        if let Err(err) = self.rescan(tab).await {
            if err.is_recoverable() || matches!(err, Error::SessionNotFound(_) | Error::SessionDisabled(_)) {
                debug!(tab = %tab, error = %err, "Debounced rescan skipped");
            } else {
                warn!(tab = %tab, error = %err, "Debounced rescan failed");
            }
        }
    }
}
