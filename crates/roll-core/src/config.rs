//! Roll configuration snapshot
//!
//! `RollConfig` is the record exchanged with the settings surfaces and the
//! storage collaborator. Field names are camelCase on the wire.

use crate::site::{selector_for_host, VideoSelector};
use crate::types::{AudioMode, Dimensions, TabId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

/// Mirror transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flip {
    #[default]
    Unset,
    Horizontal,
    Vertical,
}

/// How the scale values were chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleMode {
    Auto,
    #[default]
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scale {
    pub mode: ScaleMode,
    pub values: [f64; 2],
}

impl Default for Scale {
    fn default() -> Self {
        Self {
            mode: ScaleMode::Custom,
            values: [1.0, 1.0],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Move {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    #[default]
    Unset,
    Custom,
}

/// CSS filter values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub mode: FilterMode,
    pub blur: f64,
    pub brightness: f64,
    pub contrast: f64,
    pub grayscale: f64,
    #[serde(rename = "hue-rotate")]
    pub hue_rotate: f64,
    pub invert: f64,
}

impl Default for Filter {
    fn default() -> Self {
        Self {
            mode: FilterMode::Unset,
            blur: 0.0,
            brightness: 1.0,
            contrast: 100.0,
            grayscale: 0.0,
            hue_rotate: 0.0,
            invert: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Focus {
    pub on: bool,
    pub background_color: String,
    pub blur: bool,
    pub rounded: bool,
}

impl Default for Focus {
    fn default() -> Self {
        Self {
            on: false,
            background_color: "rgba(0, 0, 0, 0.8)".to_string(),
            blur: false,
            rounded: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvancedPictureInPicture {
    pub on: bool,
    pub origin_window_id: i64,
    pub width: f64,
    pub height: f64,
    pub left: f64,
    pub top: f64,
    pub tab_index: i32,
}

impl Default for AdvancedPictureInPicture {
    fn default() -> Self {
        Self {
            on: false,
            origin_window_id: 0,
            width: 366.0,
            height: 206.0,
            left: 800.0,
            top: 800.0,
            tab_index: -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Vr {
    pub on: bool,
}

/// AB-loop bounds; `a`/`b` are `[H:]M:S` strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopBounds {
    pub on: bool,
    pub a: String,
    pub b: String,
}

impl Default for LoopBounds {
    fn default() -> Self {
        Self {
            on: false,
            a: "00:00:00".to_string(),
            b: "00:00:00".to_string(),
        }
    }
}

impl LoopBounds {
    pub fn new(a: impl Into<String>, b: impl Into<String>) -> Self {
        Self {
            on: true,
            a: a.into(),
            b: b.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pitch {
    pub on: bool,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub title: String,
}

/// Audio sub-config, flattened into `RollConfig` on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioSettings {
    pub volume: f64,
    pub muted: bool,
    pub pitch: Pitch,
    pub delay: f64,
    pub stereo: f64,
    pub panner: bool,
    pub audio_capture_type: AudioMode,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            volume: 1.0,
            muted: false,
            pitch: Pitch::default(),
            delay: 0.0,
            stereo: 0.0,
            panner: false,
            audio_capture_type: AudioMode::Stream,
        }
    }
}

/// The per-tab configuration snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RollConfig {
    pub tab_id: TabId,
    pub tab_index: i32,
    pub video_number: usize,
    pub url: String,
    pub name: String,
    pub flip: Flip,
    pub scale: Scale,
    #[serde(rename = "move")]
    pub offset: Move,
    pub zoom: f64,
    pub deg: u16,
    pub filter: Filter,
    pub focus: Focus,
    pub picture_in_picture: bool,
    pub advanced_picture_in_picture: AdvancedPictureInPicture,
    pub vr: Vr,
    #[serde(rename = "loop")]
    pub looping: bool,
    pub ab_loop: LoopBounds,
    pub playback_rate: f64,
    pub is_auto_change_size: bool,
    pub is_init: bool,
    pub enable: bool,
    pub store: bool,
    pub store_this_tab: bool,
    pub iframes: Vec<String>,
    pub document: DocumentInfo,
    pub video_selector: VideoSelector,
    pub skip_ad: bool,
    /// Keep configured values even when the page changes them
    pub forced: bool,
    pub crossorigin: bool,
    #[serde(flatten)]
    pub audio: AudioSettings,
}

impl Default for RollConfig {
    fn default() -> Self {
        Self {
            tab_id: TabId(0),
            tab_index: -1,
            video_number: 1,
            url: String::new(),
            name: String::new(),
            flip: Flip::Unset,
            scale: Scale::default(),
            offset: Move::default(),
            zoom: 1.0,
            deg: 0,
            filter: Filter::default(),
            focus: Focus::default(),
            picture_in_picture: false,
            advanced_picture_in_picture: AdvancedPictureInPicture::default(),
            vr: Vr::default(),
            looping: false,
            ab_loop: LoopBounds::default(),
            playback_rate: 1.0,
            is_auto_change_size: true,
            is_init: false,
            enable: true,
            store: false,
            store_this_tab: true,
            iframes: Vec::new(),
            document: DocumentInfo::default(),
            video_selector: VideoSelector::default(),
            skip_ad: true,
            forced: false,
            crossorigin: false,
            audio: AudioSettings::default(),
        }
    }
}

impl RollConfig {
    /// Default config bound to a tab
    pub fn for_tab(tab: TabId) -> Self {
        Self {
            tab_id: tab,
            ..Default::default()
        }
    }

    /// Parse a config record from JSON
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Host name of the tab URL, empty when the URL does not parse
    pub fn host_name(&self) -> String {
        host_name(&self.url)
    }
}

/// Host name of `url`, empty when the URL does not parse
pub fn host_name(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default()
}

/// Storage key of the per-origin configuration record
///
/// Query string and fragment are dropped so the record is shared by every
/// page of the same path.
pub fn storage_key(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            format!("video-roll-{}", parsed)
        }
        Err(_) => format!("video-roll-{}", url),
    }
}

/// Storage key of the per-tab transient snapshot
pub fn tab_storage_key(tab: TabId) -> String {
    format!("video-roll-{}", tab)
}

/// Stored records available when a tab opens
///
/// Owned by the storage collaborator; the core only reads it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedState {
    /// Tab URL
    pub url: String,
    /// Records by storage key
    pub records: HashMap<String, RollConfig>,
}

impl PersistedState {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            records: HashMap::new(),
        }
    }

    /// Add the per-origin record for this URL
    pub fn with_origin_record(mut self, config: RollConfig) -> Self {
        self.records.insert(storage_key(&self.url), config);
        self
    }

    /// Add the per-tab snapshot of `tab`
    pub fn with_tab_snapshot(mut self, tab: TabId, config: RollConfig) -> Self {
        self.records.insert(tab_storage_key(tab), config);
        self
    }

    /// Initial config of `tab`: per-origin record, then per-tab snapshot,
    /// then defaults
    ///
    /// `isInit` is set when a per-origin record was found. Without a stored
    /// selector the site table picks one from the URL.
    pub fn resolve(&self, tab: TabId) -> RollConfig {
        let origin = self.records.get(&storage_key(&self.url));
        let snapshot = self.records.get(&tab_storage_key(tab));

        let mut config = origin.or(snapshot).cloned().unwrap_or_default();
        config.is_init = origin.is_some();
        config.tab_id = tab;
        config.url = self.url.clone();
        if config.video_selector == VideoSelector::default() {
            config.video_selector = selector_for_host(&host_name(&self.url));
        }
        config
    }
}

fn ratio_or_identity(value: f64) -> [f64; 2] {
    if value.is_finite() {
        [value, value]
    } else {
        [1.0, 1.0]
    }
}

/// Scale that keeps a rotated video inside its container
///
/// `container` is the rendered element box, `intrinsic` the video's own
/// size. Only 90/270 degree rotations change the scale.
pub fn scale_for_rotation(container: Dimensions, intrinsic: Dimensions, deg: u16) -> [f64; 2] {
    let sideways = deg % 360 == 90 || deg % 360 == 270;
    let landscape_video = intrinsic.is_landscape();
    let landscape_box = container.is_landscape();

    match (sideways, landscape_video, landscape_box) {
        // portrait video letterboxed in a landscape box
        (true, false, true) => ratio_or_identity(container.width / container.height),
        (false, false, true) => [1.0, 1.0],
        (true, true, true) => ratio_or_identity(container.height / container.width),
        (false, true, true) => [1.0, 1.0],
        (true, false, false) => ratio_or_identity(intrinsic.width / intrinsic.height),
        _ => [1.0, 1.0],
    }
}
