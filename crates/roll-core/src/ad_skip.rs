//! Ad-skip watcher
//!
//! Follows a site's "ad showing" signal on the real player and reports the
//! rising and falling edges. The session turns those edges into rate changes.

use crate::host::MediaRef;
use crate::registry::{Handler, ListenerRegistry, ListenerSlot};
use crate::site::AdSignal;
use crate::types::MediaId;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Playback rate while an ad is on screen
pub const AD_PLAYBACK_RATE: f64 = 16.0;

/// Edge of the ad signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdEdge {
    Started,
    Ended,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdSkipState {
    Off,
    Watching {
        player: MediaId,
        signal: AdSignal,
        showing: bool,
    },
}

/// Watches the ad signal of one player at a time
#[derive(Debug)]
pub struct AdSkipWatcher {
    state: AdSkipState,
    rate: f64,
}

impl Default for AdSkipWatcher {
    fn default() -> Self {
        Self::with_rate(AD_PLAYBACK_RATE)
    }
}

impl AdSkipWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Watcher that fast-forwards ads at `rate`
    pub fn with_rate(rate: f64) -> Self {
        Self {
            state: AdSkipState::Off,
            rate,
        }
    }

    /// Rate applied while an ad is showing
    pub fn ad_rate(&self) -> f64 {
        self.rate
    }

    pub fn state(&self) -> &AdSkipState {
        &self.state
    }

    pub fn is_watching(&self) -> bool {
        matches!(self.state, AdSkipState::Watching { .. })
    }

    pub fn player(&self) -> Option<&MediaId> {
        match &self.state {
            AdSkipState::Watching { player, .. } => Some(player),
            AdSkipState::Off => None,
        }
    }

    /// Whether an ad is currently showing on the watched player
    pub fn ad_showing(&self) -> bool {
        matches!(self.state, AdSkipState::Watching { showing: true, .. })
    }

    /// Start watching `player`; replaces any previous watch
    pub fn start(
        &mut self,
        registry: &mut ListenerRegistry<Handler>,
        player: &MediaId,
        element: &MediaRef,
        signal: AdSignal,
    ) {
        self.stop(registry);
        registry.bind(player, element, ListenerSlot::AdSignal, Handler::SkipAd);
        debug!(media = %player, container = %signal.container, "Ad signal watched");
        self.state = AdSkipState::Watching {
            player: player.clone(),
            signal,
            showing: false,
        };
    }

    /// Record a signal; returns the edge when the state flipped
    pub fn on_signal(&mut self, player: &MediaId, showing: bool) -> Option<AdEdge> {
        let AdSkipState::Watching {
            player: watched,
            showing: current,
            ..
        } = &mut self.state
        else {
            return None;
        };
        if *watched != *player || *current == showing {
            return None;
        }
        *current = showing;

        let edge = if showing { AdEdge::Started } else { AdEdge::Ended };
        info!(media = %player, ?edge, "Ad signal changed");
        Some(edge)
    }

    /// Detach the watcher; returns false when nothing was watched
    pub fn stop(&mut self, registry: &mut ListenerRegistry<Handler>) -> bool {
        match std::mem::replace(&mut self.state, AdSkipState::Off) {
            AdSkipState::Watching { player, .. } => {
                registry.unbind(&player, ListenerSlot::AdSignal);
                true
            }
            AdSkipState::Off => false,
        }
    }
}
