//! JSON replay scenarios
//!
//! A scenario describes a simulated page, the persisted records the tab
//! starts from, and a list of steps fed through the engine.

use anyhow::{bail, Context};
use roll_core::{
    attr,
    host::MediaEvent,
    message::drain,
    scanner::DocumentMutation,
    sim::{SimCapture, SimDocument, SimMedia},
    DocumentRef, EngineConfig, Inbound, MediaElement, MediaId, NotificationRecord, Outbound,
    PersistedState, PlaybackSnapshot, RollConfig, RollEngine, TabId,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

fn default_tab() -> TabId {
    TabId(1)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    #[serde(default = "default_tab")]
    pub tab: TabId,
    pub url: String,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub capture: CaptureSpec,
    /// Persisted records by storage key
    #[serde(default)]
    pub records: HashMap<String, RollConfig>,
    pub page: DocumentSpec,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("invalid scenario")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureSpec {
    pub stream_fails: bool,
    pub surface_fails: bool,
    pub latency_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DocumentSpec {
    pub title: String,
    pub media: Vec<MediaSpec>,
    pub frames: Vec<FrameSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaSpec {
    /// Name used by later steps
    pub key: String,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub src: Option<String>,
    #[serde(default)]
    pub poster: Option<String>,
    #[serde(default)]
    pub state: MediaState,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameSpec {
    pub src: String,
    #[serde(default)]
    pub cross_origin: bool,
    #[serde(default)]
    pub document: DocumentSpec,
}

/// Partial playback state; unset fields keep their value
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaState {
    pub current_time: Option<f64>,
    pub duration: Option<f64>,
    pub paused: Option<bool>,
    pub ended: Option<bool>,
    pub ready_state: Option<u8>,
    pub muted: Option<bool>,
    pub looping: Option<bool>,
    pub playback_rate: Option<f64>,
}

impl MediaState {
    pub fn apply(&self, snapshot: &mut PlaybackSnapshot) {
        if let Some(v) = self.current_time {
            snapshot.current_time = v;
        }
        if let Some(v) = self.duration {
            snapshot.duration = v;
        }
        if let Some(v) = self.paused {
            snapshot.paused = v;
        }
        if let Some(v) = self.ended {
            snapshot.ended = v;
        }
        if let Some(v) = self.ready_state {
            snapshot.ready_state = v;
        }
        if let Some(v) = self.muted {
            snapshot.muted = v;
        }
        if let Some(v) = self.looping {
            snapshot.looping = v;
        }
        if let Some(v) = self.playback_rate {
            snapshot.playback_rate = v;
        }
    }
}

/// One replay step
#[derive(Debug, Clone, Deserialize)]
#[serde(
    tag = "action",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum Step {
    /// Raw inbound message
    Send { message: Inbound },
    /// Merge fields into the current config and send `CONFIG_UPDATED`
    Config { patch: serde_json::Value },
    /// Host event for a media element
    Media { key: String, event: MediaEvent },
    /// Change an element's playback state without an event
    Update { key: String, state: MediaState },
    /// Check exactly these elements
    Select { keys: Vec<String> },
    /// Report mutation records
    Mutate { mutations: Vec<DocumentMutation> },
    /// Attach a new element to the top-level document
    AddMedia { media: MediaSpec },
    /// Detach an element from the top-level document
    RemoveMedia { key: String },
    /// Let time pass, then run due rescans
    Wait { ms: u64 },
    /// Close the tab
    Close,
}

/// Simulated page with its elements by key
pub struct SimPage {
    pub root: Arc<SimDocument>,
    pub media: HashMap<String, Arc<SimMedia>>,
}

impl SimPage {
    pub fn build(spec: &DocumentSpec) -> anyhow::Result<Self> {
        let mut media = HashMap::new();
        let root = build_document(spec, &mut media)?;
        Ok(Self { root, media })
    }

    pub fn element(&self, key: &str) -> anyhow::Result<&Arc<SimMedia>> {
        self.media
            .get(key)
            .with_context(|| format!("unknown media key '{}'", key))
    }

    /// Stamped id of `key`
    pub fn media_id(&self, key: &str) -> anyhow::Result<MediaId> {
        match self.element(key)?.attribute(attr::ROLL_ID) {
            Some(id) => Ok(MediaId(id)),
            None => bail!("media '{}' has not been scanned yet", key),
        }
    }
}

fn build_media(spec: &MediaSpec) -> Arc<SimMedia> {
    let mut media = SimMedia::new(spec.width, spec.height);
    if let Some(src) = &spec.src {
        media = media.with_source(src.clone());
    }
    if let Some(poster) = &spec.poster {
        media = media.with_poster(poster.clone());
    }
    media.update(|s| spec.state.apply(s));
    Arc::new(media)
}

fn build_document(
    spec: &DocumentSpec,
    media: &mut HashMap<String, Arc<SimMedia>>,
) -> anyhow::Result<Arc<SimDocument>> {
    let document = Arc::new(SimDocument::new(spec.title.clone()));
    for m in &spec.media {
        let element = build_media(m);
        if media.insert(m.key.clone(), element.clone()).is_some() {
            bail!("duplicate media key '{}'", m.key);
        }
        document.add_media(element);
    }
    for frame in &spec.frames {
        if frame.cross_origin {
            document.add_cross_origin_frame(frame.src.clone());
        } else {
            let nested = build_document(&frame.document, media)?;
            document.add_frame(frame.src.clone(), nested);
        }
    }
    Ok(document)
}

/// Everything a replay produced
#[derive(Debug, Default)]
pub struct Replay {
    pub records: Vec<NotificationRecord>,
    /// Direct replies, in step order
    pub replies: Vec<Outbound>,
    /// Steps the engine refused, with the reason
    pub errors: Vec<String>,
}

/// Run a scenario against the simulated host
pub async fn replay(scenario: &Scenario) -> anyhow::Result<Replay> {
    let capture = Arc::new(SimCapture::new());
    capture.set_stream_fails(scenario.capture.stream_fails);
    capture.set_surface_fails(scenario.capture.surface_fails);
    capture.set_latency(scenario.capture.latency_ms.map(Duration::from_millis));

    let page = SimPage::build(&scenario.page)?;
    let (engine, mut channels) = RollEngine::new(scenario.engine.clone(), capture);
    let tab = scenario.tab;

    let persisted = PersistedState {
        url: scenario.url.clone(),
        records: scenario.records.clone(),
    };
    let root: DocumentRef = page.root.clone();
    engine.open_tab(tab, root, &persisted).await?;
    info!(tab = %tab, steps = scenario.steps.len(), "Replaying scenario");

    let mut replay = Replay::default();
    for (index, step) in scenario.steps.iter().enumerate() {
        debug!(index, ?step, "Step");
        let message = match step {
            Step::Send { message } => Some(message.clone()),
            Step::Config { patch } => {
                let current = engine
                    .sessions()
                    .with(tab, |session| (*session.config()).clone())
                    .await?;
                Some(Inbound::ConfigUpdated {
                    tab_id: tab,
                    config: merge_config(&current, patch)?,
                })
            }
            Step::Media { key, event } => Some(Inbound::MediaEvent {
                tab_id: tab,
                media_id: page.media_id(key)?,
                event: *event,
            }),
            Step::Update { key, state } => {
                page.element(key)?.update(|s| state.apply(s));
                None
            }
            Step::Select { keys } => {
                let ids = keys
                    .iter()
                    .map(|key| page.media_id(key))
                    .collect::<anyhow::Result<Vec<_>>>()?;
                Some(Inbound::VideoCheckUpdate { tab_id: tab, ids })
            }
            Step::Mutate { mutations } => Some(Inbound::DocumentMutated {
                tab_id: tab,
                mutations: mutations.clone(),
            }),
            Step::AddMedia { media } => {
                page.root.add_media(build_media(media));
                None
            }
            Step::RemoveMedia { key } => {
                if !page.root.remove_media(page.element(key)?) {
                    warn!(key = %key, "Element is not in the top-level document");
                }
                None
            }
            Step::Wait { ms } => {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
                let ran = engine.run_due_rescans(&mut channels.rescans).await;
                debug!(ran, "Due rescans run");
                None
            }
            Step::Close => Some(Inbound::TabClosed { tab_id: tab }),
        };

        let Some(message) = message else {
            continue;
        };
        let kind = message.name();
        match engine.handle(message).await {
            Ok(Some(reply)) => replay.replies.push(reply),
            Ok(None) => {}
            Err(err) => replay
                .errors
                .push(format!("step {} ({}): {} [{}]", index + 1, kind, err, err.error_code())),
        }
    }

    replay.records = drain(&mut channels.notifications);
    Ok(replay)
}

/// Overlay the top-level fields of `patch` onto `current`
fn merge_config(current: &RollConfig, patch: &serde_json::Value) -> anyhow::Result<RollConfig> {
    let mut value = serde_json::to_value(current)?;
    let (Some(target), Some(fields)) = (value.as_object_mut(), patch.as_object()) else {
        bail!("config patch must be a JSON object");
    };
    for (key, field) in fields {
        target.insert(key.clone(), field.clone());
    }
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"{
        "url": "https://www.youtube.com/watch?v=abc",
        "page": {
            "title": "Watch",
            "media": [
                { "key": "main", "width": 1280, "height": 720,
                  "src": "https://cdn.example.org/v/main.mp4",
                  "state": { "currentTime": 12, "paused": false } }
            ]
        },
        "steps": [
            { "action": "config", "patch": { "abLoop": { "on": true, "a": "00:10", "b": "00:20" } } },
            { "action": "update", "key": "main", "state": { "currentTime": 21 } },
            { "action": "media", "key": "main", "event": { "kind": "time_update" } },
            { "action": "media", "key": "main", "event": { "kind": "ad_state", "showing": true } },
            { "action": "media", "key": "main", "event": { "kind": "ad_state", "showing": false } },
            { "action": "send", "message": { "type": "AUDIO_CREATE", "tabId": 1, "mode": "stream", "fallbackOnFail": true, "config": {} } },
            { "action": "close" }
        ]
    }"#;

    fn kinds(replay: &Replay) -> Vec<&'static str> {
        replay.records.iter().map(|r| r.message.name()).collect()
    }

    #[tokio::test]
    async fn test_replay_scenario() {
        let scenario = Scenario::from_json(SCENARIO).unwrap();
        let replay = replay(&scenario).await.unwrap();

        assert!(replay.errors.is_empty(), "{:?}", replay.errors);
        assert_eq!(
            kinds(&replay),
            vec![
                "BADGE_UPDATE",
                "STORAGE_UPDATED",
                "BADGE_UPDATE",
                "STORAGE_UPDATED",
                "UPDATE_STREAM_AUDIO",
                "RESET_AUDIO",
                "DELETE_AUDIO",
            ]
        );
        assert_eq!(replay.replies.len(), 1);
        assert_eq!(replay.records.last().unwrap().sequence, 7);
    }

    #[tokio::test]
    async fn test_unknown_key_fails() {
        let mut scenario = Scenario::from_json(SCENARIO).unwrap();
        scenario.steps = vec![Step::Select {
            keys: vec!["missing".to_string()],
        }];
        let err = replay(&scenario).await.unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[tokio::test]
    async fn test_engine_errors_are_collected() {
        let mut scenario = Scenario::from_json(SCENARIO).unwrap();
        scenario.steps = vec![Step::Send {
            message: Inbound::RequestRescan { tab_id: TabId(42) },
        }];
        let replay = replay(&scenario).await.unwrap();
        assert_eq!(replay.errors.len(), 1);
        assert!(replay.errors[0].contains("NO_SESSION"));
    }

    #[test]
    fn test_nested_page() {
        let spec: DocumentSpec = serde_json::from_str(
            r#"{
                "title": "outer",
                "media": [{ "key": "a", "width": 10, "height": 10 }],
                "frames": [
                    { "src": "https://player.example.org/", "document": {
                        "media": [{ "key": "b", "width": 10, "height": 10 }] } },
                    { "src": "https://ads.example.net/", "crossOrigin": true }
                ]
            }"#,
        )
        .unwrap();
        let page = SimPage::build(&spec).unwrap();
        assert_eq!(page.media.len(), 2);
        assert!(page.media_id("b").is_err());
    }
}
