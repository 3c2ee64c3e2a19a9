//! Real-player heuristic
//!
//! Picks the one element the user is actually watching out of the candidate
//! set, ignoring ads and decorative background videos.
//!
//! Rules, strongest first:
//! 1. the first loaded candidate is a provisional pick;
//! 2. a candidate smaller than the current pick is rejected, unless the
//!    current pick never started (`currentTime == 0 && paused`) and the
//!    candidate is advancing;
//! 3. `readyState == 0` is never real;
//! 4. paused at 0 is never real;
//! 5. muted + looping + smaller is an ad signature;
//! 6. anything else that is loaded, has started and is at least as large is
//!    accepted, whether it is playing, paused or ended.

use crate::types::{Dimensions, MediaId, PlaybackSnapshot};
use tracing::debug;

/// Candidate as seen by the classifier
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: MediaId,
    pub snapshot: PlaybackSnapshot,
}

impl Candidate {
    pub fn new(id: MediaId, snapshot: PlaybackSnapshot) -> Self {
        Self { id, snapshot }
    }
}

/// The selected player with the size recorded when it was selected
#[derive(Debug, Clone, PartialEq)]
pub struct RealPlayer {
    pub id: MediaId,
    pub dimensions: Dimensions,
}

/// Why a candidate was not accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NotLoaded,
    NotStarted,
    AdSignature,
    Smaller,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(Rejection),
}

impl Verdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept)
    }
}

/// Current pick a challenger is compared against
#[derive(Debug, Clone, Copy)]
pub struct Incumbent<'a> {
    pub dimensions: Dimensions,
    pub snapshot: &'a PlaybackSnapshot,
}

/// Judge one candidate against the current pick
pub fn judge(candidate: &PlaybackSnapshot, incumbent: Option<Incumbent<'_>>) -> Verdict {
    if candidate.ready_state == 0 {
        return Verdict::Reject(Rejection::NotLoaded);
    }

    let smaller = incumbent
        .map(|current| candidate.rendered.is_smaller_than(&current.dimensions))
        .unwrap_or(false);

    if let Some(current) = incumbent {
        // recovers from a first pick that never started
        if current.snapshot.is_stalled() && candidate.is_advancing() {
            return Verdict::Accept;
        }
    }

    if candidate.is_stalled() {
        return Verdict::Reject(Rejection::NotStarted);
    }
    if candidate.muted && candidate.looping && smaller {
        return Verdict::Reject(Rejection::AdSignature);
    }
    if smaller {
        return Verdict::Reject(Rejection::Smaller);
    }
    Verdict::Accept
}

/// Stateful classifier; remembers the last pick and its size
#[derive(Debug, Default)]
pub struct RealPlayerHeuristic {
    current: Option<RealPlayer>,
}

impl RealPlayerHeuristic {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&RealPlayer> {
        self.current.as_ref()
    }

    pub fn clear(&mut self) {
        self.current = None;
    }

    /// Re-evaluate the real player over `candidates` in scan order
    ///
    /// When no candidate beats the provisional first pick, a still-loaded
    /// `previous` pick is kept instead.
    pub fn classify(&mut self, candidates: &[Candidate], previous: Option<&MediaId>) -> Option<MediaId> {
        let mut chosen: Option<(usize, bool)> = None;

        for (index, candidate) in candidates.iter().enumerate() {
            match chosen {
                None => {
                    let verdict = judge(&candidate.snapshot, None);
                    if verdict == Verdict::Reject(Rejection::NotLoaded) {
                        continue;
                    }
                    chosen = Some((index, !verdict.is_accept()));
                }
                Some((current, _)) => {
                    let incumbent = &candidates[current].snapshot;
                    let verdict = judge(
                        &candidate.snapshot,
                        Some(Incumbent {
                            dimensions: incumbent.rendered,
                            snapshot: incumbent,
                        }),
                    );
                    if verdict.is_accept() {
                        chosen = Some((index, false));
                    }
                }
            }
        }

        if let (Some((_, true)), Some(previous)) = (chosen, previous) {
            let kept = candidates
                .iter()
                .position(|c| &c.id == previous && c.snapshot.ready_state > 0);
            if let Some(index) = kept {
                chosen = Some((index, true));
            }
        }

        self.current = chosen.map(|(index, _)| RealPlayer {
            id: candidates[index].id.clone(),
            dimensions: candidates[index].snapshot.rendered,
        });

        debug!(
            candidates = candidates.len(),
            real = ?self.current.as_ref().map(|r| r.id.as_str()),
            provisional = chosen.map(|(_, p)| p).unwrap_or(false),
            "Real player classified"
        );
        self.current.as_ref().map(|real| real.id.clone())
    }

    /// Make a candidate that just started playing the real player
    ///
    /// Returns false for an element that has no data yet.
    pub fn promote(&mut self, candidate: &Candidate) -> bool {
        if candidate.snapshot.ready_state == 0 {
            return false;
        }
        self.current = Some(RealPlayer {
            id: candidate.id.clone(),
            dimensions: candidate.snapshot.rendered,
        });
        true
    }
}
