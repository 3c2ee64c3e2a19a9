//! Tab session - per-tab aggregate of candidates and the real player
//!
//! Coordinates:
//! - Candidate scanning and listener bookkeeping
//! - Real-player selection and controller rebinding
//! - Configuration application
//! - Attribute watchers on the real player

use crate::{
    ad_skip::{AdEdge, AdSkipWatcher},
    config::{scale_for_rotation, RollConfig},
    heuristic::{Candidate, RealPlayerHeuristic},
    host::{DocumentRef, MediaEvent, MediaRef},
    looper::{AbLoopController, LoopWindow},
    registry::{Handler, ListenerRegistry, ListenerSlot},
    scanner::Scanner,
    site::{profile_for_host, AdSignal},
    types::*,
    Error, Result,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Watchers that follow the real player
const REAL_PLAYER_WATCHERS: [ListenerSlot; 3] = [
    ListenerSlot::RateWatch,
    ListenerSlot::LoopWatch,
    ListenerSlot::PipWatch,
];

/// One tracked candidate element
#[derive(Clone)]
pub struct TrackedMedia {
    pub id: MediaId,
    pub element: MediaRef,
    /// Selected by the user for transforms
    pub checked: bool,
    /// Intersecting the viewport
    pub visible: bool,
    pub is_real: bool,
}

impl TrackedMedia {
    /// Badge summary; `index` is the position in scan order
    pub fn summary(&self, index: usize) -> MediaSummary {
        let snapshot = self.element.snapshot();
        let source = self.element.source().filter(|s| !s.is_empty());

        let src = match source.as_deref() {
            Some(s) => s.strip_prefix("blob:").unwrap_or(s).to_string(),
            None => "no-src".to_string(),
        };
        let name = source
            .as_deref()
            .and_then(media_name)
            .unwrap_or_else(|| format!("video {}", index + 1));

        MediaSummary {
            id: self.id.clone(),
            name,
            src,
            poster_url: self.element.poster().unwrap_or_default(),
            checked: self.checked,
            visible: self.visible,
            is_real: self.is_real,
            duration: snapshot.duration,
            current_time: snapshot.current_time,
            percentage: snapshot.percentage(),
            paused: snapshot.paused,
        }
    }
}

/// Last path segment of a media URL; blob URLs have no useful name
fn media_name(source: &str) -> Option<String> {
    if source.starts_with("blob:") {
        return None;
    }
    let url = Url::parse(source).ok()?;
    let segment = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
    Some(segment.to_string())
}

/// Visual-mode flags derived from the config
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualModes {
    pub focus: bool,
    pub vr: bool,
    pub picture_in_picture: bool,
    pub advanced_picture_in_picture: bool,
}

impl VisualModes {
    pub fn from_config(config: &RollConfig) -> Self {
        Self {
            focus: config.focus.on,
            vr: config.vr.on,
            picture_in_picture: config.picture_in_picture,
            advanced_picture_in_picture: config.advanced_picture_in_picture.on,
        }
    }
}

/// What a rescan changed
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RescanReport {
    pub added: Vec<MediaId>,
    pub removed: Vec<MediaId>,
    pub real: Option<MediaId>,
    pub real_changed: bool,
    pub skipped_frames: usize,
}

/// Controller-relevant changes made by a config application
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDiff {
    /// New scale values when they were recomputed for a rotation
    pub scale: Option<[f64; 2]>,
    pub looping: bool,
    pub playback_rate: bool,
    pub ab_loop: bool,
    pub visual_modes: bool,
    pub skip_ad: bool,
    pub audio: bool,
    pub title: bool,
    /// The video selector changed and a rescan is due
    pub selector: bool,
    /// The session left the disabled state
    pub enabled: bool,
    /// Checked candidates the config was applied to
    pub applied: usize,
}

impl ConfigDiff {
    pub fn is_empty(&self) -> bool {
        self.scale.is_none()
            && !self.looping
            && !self.playback_rate
            && !self.ab_loop
            && !self.visual_modes
            && !self.skip_ad
            && !self.audio
            && !self.title
            && !self.selector
            && !self.enabled
    }
}

/// Effects of one media event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaEventOutcome {
    /// Candidate summaries changed
    pub badge: bool,
    /// Config changed and should be persisted
    pub storage: bool,
    pub real_changed: bool,
    /// The AB loop jumped back
    pub looped: bool,
    pub ad_edge: Option<AdEdge>,
}

/// Per-tab session
pub struct Session {
    /// Owning tab
    tab: TabId,
    /// Top-level document
    root: DocumentRef,
    /// Root plus frames holding media, from the last scan
    documents: Vec<DocumentRef>,
    /// Candidates in scan order
    candidates: Vec<TrackedMedia>,
    /// Selected real player
    real: Option<MediaId>,
    heuristic: RealPlayerHeuristic,
    registry: ListenerRegistry<Handler>,
    config: Arc<RollConfig>,
    looper: AbLoopController,
    ad_skipper: AdSkipWatcher,
    scanner: Scanner,
    modes: VisualModes,
    enabled: bool,
    opened_at: DateTime<Utc>,
}

impl Session {
    /// Create a session for `tab`; no scan is performed yet
    pub fn new(tab: TabId, root: DocumentRef, mut config: RollConfig) -> Self {
        config.tab_id = tab;
        let enabled = config.enable;
        let modes = VisualModes::from_config(&config);

        Self {
            tab,
            root,
            documents: Vec::new(),
            candidates: Vec::new(),
            real: None,
            heuristic: RealPlayerHeuristic::new(),
            registry: ListenerRegistry::new(),
            config: Arc::new(config),
            looper: AbLoopController::new(),
            ad_skipper: AdSkipWatcher::new(),
            scanner: Scanner::new(),
            modes,
            enabled,
            opened_at: Utc::now(),
        }
    }

    /// Fast-forward rate used while an ad is showing
    pub fn with_ad_rate(mut self, rate: f64) -> Self {
        self.ad_skipper = AdSkipWatcher::with_rate(rate);
        self
    }

    pub fn with_scanner(mut self, scanner: Scanner) -> Self {
        self.scanner = scanner;
        self
    }

    pub fn tab(&self) -> TabId {
        self.tab
    }

    /// Current config snapshot
    pub fn config(&self) -> Arc<RollConfig> {
        self.config.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// Time since the session was opened
    pub fn open_for(&self) -> chrono::Duration {
        Utc::now() - self.opened_at
    }

    pub fn documents(&self) -> &[DocumentRef] {
        &self.documents
    }

    pub fn candidates(&self) -> &[TrackedMedia] {
        &self.candidates
    }

    pub fn candidate(&self, id: &MediaId) -> Option<&TrackedMedia> {
        self.candidates.iter().find(|c| &c.id == id)
    }

    pub fn real_player(&self) -> Option<&MediaId> {
        self.real.as_ref()
    }

    pub fn real_element(&self) -> Option<MediaRef> {
        let id = self.real.as_ref()?;
        self.candidate(id).map(|c| c.element.clone())
    }

    pub fn modes(&self) -> VisualModes {
        self.modes
    }

    pub fn looper(&self) -> &AbLoopController {
        &self.looper
    }

    pub fn ad_skipper(&self) -> &AdSkipWatcher {
        &self.ad_skipper
    }

    /// Number of listeners currently bound by this session
    pub fn listener_count(&self) -> usize {
        self.registry.len()
    }

    /// Badge summaries in scan order
    pub fn summaries(&self) -> Vec<MediaSummary> {
        self.candidates
            .iter()
            .enumerate()
            .map(|(index, media)| media.summary(index))
            .collect()
    }

    /// Rescan the document set and reconcile candidates and listeners
    #[instrument(skip(self), fields(tab = %self.tab))]
    pub fn rescan(&mut self) -> Result<RescanReport> {
        if !self.enabled {
            return Err(Error::SessionDisabled(self.tab));
        }

        let scan = self.scanner.scan(&self.root, &self.config.video_selector);
        let mut report = RescanReport {
            skipped_frames: scan.skipped_frames,
            ..Default::default()
        };

        let fresh: HashSet<MediaId> = scan.ids().into_iter().collect();
        let mut kept: HashMap<MediaId, TrackedMedia> = HashMap::new();
        for tracked in std::mem::take(&mut self.candidates) {
            if fresh.contains(&tracked.id) {
                kept.insert(tracked.id.clone(), tracked);
            } else {
                self.registry.unbind_all(&tracked.id);
                report.removed.push(tracked.id);
            }
        }

        for scanned in scan.elements {
            let tracked = match kept.remove(&scanned.id) {
                Some(mut existing) => {
                    existing.checked = scanned.checked;
                    existing.element = scanned.element;
                    existing
                }
                None => {
                    self.bind_candidate(&scanned.id, &scanned.element);
                    report.added.push(scanned.id.clone());
                    let tracked = TrackedMedia {
                        id: scanned.id,
                        element: scanned.element,
                        checked: scanned.checked,
                        visible: false,
                        is_real: false,
                    };
                    if tracked.checked {
                        apply_to_element(&tracked.element, &self.config, !self.ad_skipper.ad_showing());
                    }
                    tracked
                }
            };
            self.candidates.push(tracked);
        }

        let snapshots: Vec<Candidate> = self
            .candidates
            .iter()
            .map(|c| Candidate::new(c.id.clone(), c.element.snapshot()))
            .collect();
        let previous = self.real.clone();
        let still_present = previous
            .as_ref()
            .filter(|id| snapshots.iter().any(|c| &c.id == *id));
        let real = self.heuristic.classify(&snapshots, still_present);

        self.real = real.clone();
        self.mark_real();
        report.real_changed = real != previous;
        report.real = real;
        if report.real_changed {
            self.rebind_real(previous.as_ref());
        }

        self.documents = scan.documents;
        let title = self.root.title();
        let config = Arc::make_mut(&mut self.config);
        config.iframes = scan.frame_sources;
        config.video_number = self.candidates.len();
        config.document.title = title;

        info!(
            candidates = self.candidates.len(),
            added = report.added.len(),
            removed = report.removed.len(),
            real = ?report.real.as_ref().map(MediaId::as_str),
            "Rescan complete"
        );
        Ok(report)
    }

    /// Apply a new config snapshot and return what changed
    #[instrument(skip(self, next), fields(tab = %self.tab))]
    pub fn apply_config(&mut self, mut next: RollConfig) -> Result<ConfigDiff> {
        let previous = self.config.clone();
        next.tab_id = self.tab;
        next.iframes = previous.iframes.clone();
        next.video_number = self.candidates.len();

        let mut diff = ConfigDiff::default();

        if !self.enabled {
            // inert until the next rescan
            if next.enable {
                self.enabled = true;
                diff.enabled = true;
                info!("Session re-enabled");
            }
            self.modes = VisualModes::from_config(&next);
            self.config = Arc::new(next);
            return Ok(diff);
        }

        if next.is_auto_change_size
            && !next.is_init
            && next.deg != previous.deg
            && next.scale.values == previous.scale.values
        {
            if let Some(real) = self.real_element() {
                let snapshot = real.snapshot();
                let values = scale_for_rotation(snapshot.rendered, snapshot.intrinsic, next.deg);
                debug!(deg = next.deg, ?values, "Scale recomputed for rotation");
                next.scale.values = values;
                diff.scale = Some(values);
            }
        }

        next.document.title = self.root.title();
        diff.title = next.document.title != previous.document.title;
        diff.looping = next.looping != previous.looping;
        diff.playback_rate = next.playback_rate != previous.playback_rate;
        diff.audio = next.audio != previous.audio;
        diff.selector = next.video_selector != previous.video_selector;

        let keep_rate = !self.ad_skipper.ad_showing();
        for media in &self.candidates {
            if media.checked {
                apply_to_element(&media.element, &next, keep_rate);
                diff.applied += 1;
            } else {
                media.element.set_attribute(attr::ROLL_ACTIVE, "false");
                media.element.set_looping(false);
            }
        }

        let modes = VisualModes::from_config(&next);
        diff.visual_modes = modes != self.modes;
        self.modes = modes;

        diff.ab_loop = next.ab_loop != previous.ab_loop;
        diff.skip_ad = next.skip_ad != previous.skip_ad;
        self.config = Arc::new(next);

        if diff.ab_loop || (self.config.ab_loop.on && !self.looper.is_armed()) {
            self.refresh_loop();
        }
        if diff.skip_ad {
            self.refresh_ad_skip();
        }

        debug!(?diff, "Config applied");
        Ok(diff)
    }

    /// Set the checked flag: ids in `ids` are checked, all others unchecked
    ///
    /// The current config is re-applied afterwards.
    pub fn set_checked(&mut self, ids: &[MediaId]) -> Result<ConfigDiff> {
        let selected: HashSet<&MediaId> = ids.iter().collect();
        for media in &mut self.candidates {
            media.checked = selected.contains(&media.id);
            media.element.set_attribute(
                attr::ROLL_CHECK,
                if media.checked { "true" } else { "false" },
            );
        }
        let current = (*self.config).clone();
        self.apply_config(current)
    }

    /// Dispatch a host event to the listeners bound for `id`
    pub fn handle_media_event(&mut self, id: &MediaId, event: MediaEvent) -> Result<MediaEventOutcome> {
        if !self.enabled {
            return Err(Error::SessionDisabled(self.tab));
        }
        let element = self
            .candidate(id)
            .map(|c| c.element.clone())
            .ok_or_else(|| Error::MediaNotFound(id.clone()))?;

        let mut outcome = MediaEventOutcome::default();
        for slot in self.registry.slots_for(id, event.kind()) {
            let Some(handler) = self.registry.handler(id, slot).copied() else {
                continue;
            };
            match (handler, event) {
                (Handler::Progress, MediaEvent::TimeUpdate) => outcome.badge = true,
                (Handler::Loop(_), MediaEvent::TimeUpdate) => {
                    outcome.looped |= self.looper.on_time_update(id, &element);
                }
                (Handler::Promote, MediaEvent::Play) => {
                    outcome.real_changed |= self.promote(id)?;
                    outcome.badge = true;
                }
                (Handler::TrackVisibility, MediaEvent::Visibility { visible }) => {
                    if let Some(media) = self.candidates.iter_mut().find(|c| &c.id == id) {
                        media.visible = visible;
                    }
                    element.set_attribute(attr::ROLL_VISIBLE, if visible { "true" } else { "false" });
                    outcome.badge = true;
                }
                (Handler::SyncConfig, event) => {
                    outcome.storage |= self.sync_from_element(&element, event);
                }
                (Handler::SkipAd, MediaEvent::AdState { showing }) => {
                    if let Some(edge) = self.ad_skipper.on_signal(id, showing) {
                        outcome.storage |= self.apply_ad_edge(edge);
                        outcome.ad_edge = Some(edge);
                    }
                }
                _ => {}
            }
        }
        Ok(outcome)
    }

    /// Make `id` the real player after it started playing
    ///
    /// Returns true when the real player changed.
    pub fn promote(&mut self, id: &MediaId) -> Result<bool> {
        let media = self.candidate(id).ok_or_else(|| Error::MediaNotFound(id.clone()))?;
        if self.real.as_ref() == Some(id) {
            return Ok(false);
        }
        let candidate = Candidate::new(id.clone(), media.element.snapshot());
        if !self.heuristic.promote(&candidate) {
            return Ok(false);
        }

        let previous = self.real.replace(id.clone());
        self.mark_real();
        self.rebind_real(previous.as_ref());
        info!(tab = %self.tab, media = %id, "Real player promoted");
        Ok(true)
    }

    /// Stop every controller, restore playback and drop all listeners
    ///
    /// Returns the final config. The session stays registered; a config
    /// with `enable = true` plus a rescan brings it back.
    #[instrument(skip(self), fields(tab = %self.tab))]
    pub fn disable(&mut self) -> Arc<RollConfig> {
        for media in &self.candidates {
            media.element.set_playback_rate(1.0);
            media.element.set_attribute(attr::ROLL_ACTIVE, "false");
        }
        self.teardown();
        self.enabled = false;

        let config = Arc::make_mut(&mut self.config);
        config.enable = false;
        config.playback_rate = 1.0;
        info!("Session disabled");
        self.config.clone()
    }

    /// Release every listener and controller; returns the number of
    /// listeners detached
    pub fn teardown(&mut self) -> usize {
        self.looper.stop_loop(&mut self.registry);
        self.ad_skipper.stop(&mut self.registry);
        let detached = self.registry.unbind_everything();

        self.candidates.clear();
        self.documents.clear();
        self.real = None;
        self.heuristic.clear();
        debug!(tab = %self.tab, detached, "Session torn down");
        detached
    }

    fn bind_candidate(&mut self, id: &MediaId, element: &MediaRef) {
        self.registry.bind(id, element, ListenerSlot::Progress, Handler::Progress);
        self.registry.bind(id, element, ListenerSlot::Play, Handler::Promote);
        self.registry.bind(id, element, ListenerSlot::Visibility, Handler::TrackVisibility);
    }

    fn mark_real(&mut self) {
        for media in self.candidates.iter_mut() {
            media.is_real = self.real.as_ref() == Some(&media.id);
        }
    }

    /// Move loop, ad-skip and attribute watchers to the current real player
    fn rebind_real(&mut self, previous: Option<&MediaId>) {
        self.looper.stop_loop(&mut self.registry);
        self.ad_skipper.stop(&mut self.registry);
        if let Some(old) = previous {
            for slot in REAL_PLAYER_WATCHERS {
                self.registry.unbind(old, slot);
            }
        }

        let Some(id) = self.real.clone() else {
            return;
        };
        let Some(element) = self.real_element() else {
            return;
        };
        for slot in REAL_PLAYER_WATCHERS {
            self.registry.bind(&id, &element, slot, Handler::SyncConfig);
        }
        if self.config.ab_loop.on {
            self.arm_loop(&id, &element);
        }
        if self.config.skip_ad {
            if let Some(signal) = self.ad_signal() {
                self.ad_skipper.start(&mut self.registry, &id, &element, signal);
            }
        }
    }

    fn refresh_loop(&mut self) {
        match (self.config.ab_loop.on, self.real.clone(), self.real_element()) {
            (true, Some(id), Some(element)) => self.arm_loop(&id, &element),
            _ => {
                self.looper.stop_loop(&mut self.registry);
            }
        }
    }

    fn arm_loop(&mut self, id: &MediaId, element: &MediaRef) {
        match LoopWindow::from_bounds(&self.config.ab_loop) {
            Ok(window) => self.looper.start_loop(&mut self.registry, id, element, window),
            Err(err) => {
                warn!(tab = %self.tab, error = %err, "AB loop left off");
                self.looper.stop_loop(&mut self.registry);
            }
        }
    }

    fn refresh_ad_skip(&mut self) {
        if !self.config.skip_ad {
            self.ad_skipper.stop(&mut self.registry);
            return;
        }
        let (Some(id), Some(element), Some(signal)) =
            (self.real.clone(), self.real_element(), self.ad_signal())
        else {
            return;
        };
        self.ad_skipper.start(&mut self.registry, &id, &element, signal);
    }

    fn ad_signal(&self) -> Option<AdSignal> {
        profile_for_host(&self.config.host_name()).and_then(|profile| profile.ad_signal)
    }

    /// Copy a changed element property into the config
    ///
    /// With `forced` set the config wins and is pushed back to the element.
    fn sync_from_element(&mut self, element: &MediaRef, event: MediaEvent) -> bool {
        if self.config.forced {
            match event {
                MediaEvent::RateChange => element.set_playback_rate(self.config.playback_rate),
                MediaEvent::LoopAttribute => element.set_looping(self.config.looping),
                _ => {}
            }
            return false;
        }
        if self.ad_skipper.ad_showing() && event == MediaEvent::RateChange {
            return false;
        }

        let snapshot = element.snapshot();
        let config = Arc::make_mut(&mut self.config);
        match event {
            MediaEvent::RateChange if config.playback_rate != snapshot.playback_rate => {
                config.playback_rate = snapshot.playback_rate;
                true
            }
            MediaEvent::LoopAttribute if config.looping != snapshot.looping => {
                config.looping = snapshot.looping;
                true
            }
            MediaEvent::PictureInPicture { active } if config.picture_in_picture != active => {
                config.picture_in_picture = active;
                self.modes.picture_in_picture = active;
                true
            }
            _ => false,
        }
    }

    fn apply_ad_edge(&mut self, edge: AdEdge) -> bool {
        match edge {
            AdEdge::Started => {
                let rate = self.ad_skipper.ad_rate();
                for media in &self.candidates {
                    media.element.set_playback_rate(rate);
                }
                false
            }
            AdEdge::Ended => {
                for media in &self.candidates {
                    media.element.set_playback_rate(1.0);
                }
                Arc::make_mut(&mut self.config).playback_rate = 1.0;
                true
            }
        }
    }
}

/// Push the per-element part of `config` onto a checked element
fn apply_to_element(element: &MediaRef, config: &RollConfig, with_rate: bool) {
    element.set_attribute(attr::ROLL_ACTIVE, "true");
    element.set_looping(config.looping);
    if with_rate {
        element.set_playback_rate(config.playback_rate);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.registry.is_empty() {
            self.teardown();
        }
    }
}
