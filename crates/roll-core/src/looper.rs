//! AB-loop controller
//!
//! Keeps a single time-boundary watcher on the real player. Bounds arrive as
//! `[H:]M:S` strings and are parsed once when the loop is armed.

use crate::config::LoopBounds;
use crate::error::{Error, Result};
use crate::host::MediaRef;
use crate::registry::{Handler, ListenerRegistry, ListenerSlot};
use crate::types::MediaId;
use nom::character::complete::{char, digit1};
use nom::combinator::{all_consuming, map_res, opt, recognize};
use nom::multi::separated_list1;
use nom::{IResult, Parser};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Seconds per field, least significant first
const UNIT_SECONDS: [f64; 3] = [1.0, 60.0, 3600.0];

/// Plain decimal: digits with an optional `.fraction`
fn field(input: &str) -> IResult<&str, f64> {
    map_res(recognize((digit1, opt((char('.'), digit1)))), str::parse::<f64>).parse(input)
}

fn fields(input: &str) -> IResult<&str, Vec<f64>> {
    all_consuming(separated_list1(char(':'), field)).parse(input)
}

/// Parse a `[H:]M:S` timestamp into seconds
///
/// One to three colon-separated fields; missing higher units are zero and
/// fractional seconds are kept (`"1:02.5"` is 62.5).
pub fn parse_timestamp(input: &str) -> Result<f64> {
    let trimmed = input.trim();
    let (_, values) = fields(trimmed).map_err(|_| Error::InvalidTimestamp(input.to_string()))?;

    if values.len() > UNIT_SECONDS.len() {
        return Err(Error::InvalidTimestamp(input.to_string()));
    }

    Ok(values
        .iter()
        .rev()
        .zip(UNIT_SECONDS)
        .map(|(value, unit)| value * unit)
        .sum())
}

/// Parsed loop bounds in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoopWindow {
    pub a: f64,
    pub b: f64,
}

impl LoopWindow {
    pub fn new(a: f64, b: f64) -> Self {
        Self { a, b }
    }

    pub fn from_bounds(bounds: &LoopBounds) -> Result<Self> {
        Ok(Self {
            a: parse_timestamp(&bounds.a)?,
            b: parse_timestamp(&bounds.b)?,
        })
    }
}

/// Loop state
#[derive(Debug, Clone, PartialEq)]
pub enum LoopState {
    Off,
    Armed { player: MediaId, window: LoopWindow },
}

/// Attaches and detaches the loop watcher
#[derive(Debug)]
pub struct AbLoopController {
    state: LoopState,
}

impl Default for AbLoopController {
    fn default() -> Self {
        Self {
            state: LoopState::Off,
        }
    }
}

impl AbLoopController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &LoopState {
        &self.state
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.state, LoopState::Armed { .. })
    }

    /// Player the loop is armed on
    pub fn player(&self) -> Option<&MediaId> {
        match &self.state {
            LoopState::Armed { player, .. } => Some(player),
            LoopState::Off => None,
        }
    }

    /// Arm the loop on `player`: seek to `a`, resume, then watch for `b`
    pub fn start_loop(
        &mut self,
        registry: &mut ListenerRegistry<Handler>,
        player: &MediaId,
        element: &MediaRef,
        window: LoopWindow,
    ) {
        if window.a > window.b {
            warn!(media = %player, a = window.a, b = window.b, "Loop start is after loop end");
        }

        if let LoopState::Armed { player: previous, .. } = &self.state {
            if previous != player {
                registry.unbind(previous, ListenerSlot::AbLoop);
            }
        }
        registry.unbind(player, ListenerSlot::AbLoop);

        element.seek(window.a);
        element.play();
        registry.bind(player, element, ListenerSlot::AbLoop, Handler::Loop(window));

        debug!(media = %player, a = window.a, b = window.b, "AB loop armed");
        self.state = LoopState::Armed {
            player: player.clone(),
            window,
        };
    }

    /// Detach the watcher; returns false when the loop was already off
    pub fn stop_loop(&mut self, registry: &mut ListenerRegistry<Handler>) -> bool {
        match std::mem::replace(&mut self.state, LoopState::Off) {
            LoopState::Armed { player, .. } => {
                registry.unbind(&player, ListenerSlot::AbLoop);
                debug!(media = %player, "AB loop stopped");
                true
            }
            LoopState::Off => false,
        }
    }

    /// Time-advance callback; returns true when playback jumped back to `a`
    pub fn on_time_update(&self, player: &MediaId, element: &MediaRef) -> bool {
        let LoopState::Armed { player: armed, window } = &self.state else {
            return false;
        };
        if armed != player {
            return false;
        }
        if element.snapshot().current_time >= window.b {
            element.seek(window.a);
            element.play();
            return true;
        }
        false
    }
}
