//! Message protocol
//!
//! Everything the core exchanges with the settings surfaces, the capture
//! context and the page glue is one of these two tagged unions. Outgoing
//! notifications are wrapped in a [`NotificationRecord`] and flow through the
//! [`Outbox`].

use crate::config::RollConfig;
use crate::host::MediaEvent;
use crate::scanner::DocumentMutation;
use crate::types::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

/// Messages handled by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Inbound {
    /// Rescan the tab and report its candidates
    RequestRescan { tab_id: TabId },

    /// New config from a settings surface
    ConfigUpdated { tab_id: TabId, config: RollConfig },

    /// Build the audio pipeline; answered with `AUDIO_MODE_RESULT`
    AudioCreate {
        tab_id: TabId,
        mode: AudioMode,
        fallback_on_fail: bool,
        config: RollConfig,
    },

    /// Audio settings changed
    AudioUpdate { tab_id: TabId, config: RollConfig },

    AudioReset { tab_id: TabId },

    /// The user's candidate selection; listed ids are checked
    VideoCheckUpdate { tab_id: TabId, ids: Vec<MediaId> },

    /// Raw mutation records from the page
    DocumentMutated {
        tab_id: TabId,
        mutations: Vec<DocumentMutation>,
    },

    /// Host event for one element
    MediaEvent {
        tab_id: TabId,
        media_id: MediaId,
        event: MediaEvent,
    },

    Disable { tab_id: TabId },

    TabClosed { tab_id: TabId },
}

impl Inbound {
    /// Tab the message is addressed to
    pub fn tab(&self) -> TabId {
        match self {
            Inbound::RequestRescan { tab_id }
            | Inbound::ConfigUpdated { tab_id, .. }
            | Inbound::AudioCreate { tab_id, .. }
            | Inbound::AudioUpdate { tab_id, .. }
            | Inbound::AudioReset { tab_id }
            | Inbound::VideoCheckUpdate { tab_id, .. }
            | Inbound::DocumentMutated { tab_id, .. }
            | Inbound::MediaEvent { tab_id, .. }
            | Inbound::Disable { tab_id }
            | Inbound::TabClosed { tab_id } => *tab_id,
        }
    }

    /// Wire name of the message
    pub fn name(&self) -> &'static str {
        match self {
            Inbound::RequestRescan { .. } => "REQUEST_RESCAN",
            Inbound::ConfigUpdated { .. } => "CONFIG_UPDATED",
            Inbound::AudioCreate { .. } => "AUDIO_CREATE",
            Inbound::AudioUpdate { .. } => "AUDIO_UPDATE",
            Inbound::AudioReset { .. } => "AUDIO_RESET",
            Inbound::VideoCheckUpdate { .. } => "VIDEO_CHECK_UPDATE",
            Inbound::DocumentMutated { .. } => "DOCUMENT_MUTATED",
            Inbound::MediaEvent { .. } => "MEDIA_EVENT",
            Inbound::Disable { .. } => "DISABLE",
            Inbound::TabClosed { .. } => "TAB_CLOSED",
        }
    }
}

/// Notifications and replies emitted by the core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Outbound {
    /// Candidate count and summaries for the badge
    BadgeUpdate {
        tab_id: TabId,
        count: usize,
        summaries: Vec<MediaSummary>,
    },

    /// Config changed and should be persisted
    StorageUpdated { tab_id: TabId, config: RollConfig },

    /// Reply to `AUDIO_CREATE`
    AudioModeResult {
        tab_id: TabId,
        mode: Option<AudioMode>,
    },

    /// Both audio strategies failed
    AudioFailed { tab_id: TabId, message: String },

    UpdateStreamAudio {
        tab_id: TabId,
        stream: StreamHandle,
        config: RollConfig,
    },

    UpdateElementAudio { tab_id: TabId, config: RollConfig },

    ResetAudio { tab_id: TabId },

    /// Tear down the capture surface side of a stream pipeline
    DeleteAudio { tab_id: TabId },

    Disabled { tab_id: TabId, config: RollConfig },
}

impl Outbound {
    pub fn tab(&self) -> TabId {
        match self {
            Outbound::BadgeUpdate { tab_id, .. }
            | Outbound::StorageUpdated { tab_id, .. }
            | Outbound::AudioModeResult { tab_id, .. }
            | Outbound::AudioFailed { tab_id, .. }
            | Outbound::UpdateStreamAudio { tab_id, .. }
            | Outbound::UpdateElementAudio { tab_id, .. }
            | Outbound::ResetAudio { tab_id }
            | Outbound::DeleteAudio { tab_id }
            | Outbound::Disabled { tab_id, .. } => *tab_id,
        }
    }

    /// Wire name of the message
    pub fn name(&self) -> &'static str {
        match self {
            Outbound::BadgeUpdate { .. } => "BADGE_UPDATE",
            Outbound::StorageUpdated { .. } => "STORAGE_UPDATED",
            Outbound::AudioModeResult { .. } => "AUDIO_MODE_RESULT",
            Outbound::AudioFailed { .. } => "AUDIO_FAILED",
            Outbound::UpdateStreamAudio { .. } => "UPDATE_STREAM_AUDIO",
            Outbound::UpdateElementAudio { .. } => "UPDATE_ELEMENT_AUDIO",
            Outbound::ResetAudio { .. } => "RESET_AUDIO",
            Outbound::DeleteAudio { .. } => "DELETE_AUDIO",
            Outbound::Disabled { .. } => "DISABLED",
        }
    }
}

/// Notification with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Unique notification ID
    pub id: Uuid,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
    /// Sequence number, starting at 1
    pub sequence: u64,
    /// The notification
    #[serde(flatten)]
    pub message: Outbound,
}

/// Outgoing notification channel
///
/// Cheap to clone; every clone shares the sequence counter.
#[derive(Clone)]
pub struct Outbox {
    sequence: Arc<AtomicU64>,
    tx: mpsc::UnboundedSender<NotificationRecord>,
}

impl Outbox {
    /// Create an outbox and the receiver that drains it
    pub fn new() -> (Self, mpsc::UnboundedReceiver<NotificationRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                sequence: Arc::new(AtomicU64::new(0)),
                tx,
            },
            rx,
        )
    }

    /// Publish a notification; returns its sequence number
    pub fn publish(&self, message: Outbound) -> u64 {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        trace!(sequence, kind = message.name(), tab = %message.tab(), "Notification");

        let record = NotificationRecord {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            sequence,
            message,
        };
        if self.tx.send(record).is_err() {
            debug!(sequence, "Notification dropped, receiver closed");
        }
        sequence
    }

    /// Number of notifications published so far
    pub fn published(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

/// Drain every record currently queued in `rx`
pub fn drain(rx: &mut mpsc::UnboundedReceiver<NotificationRecord>) -> Vec<NotificationRecord> {
    let mut records = Vec::new();
    while let Ok(record) = rx.try_recv() {
        records.push(record);
    }
    records
}
