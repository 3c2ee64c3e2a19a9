//! Document/candidate scanner
//!
//! Walks the root document and every nested frame reachable from it and
//! collects the media elements matching the site selector. Newly seen
//! elements are stamped with a stable id and a default "checked" flag; an
//! element the user unchecked keeps its flag across rescans.

use crate::host::{DocumentRef, MediaRef};
use crate::site::VideoSelector;
use crate::types::{attr, MediaId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// Frames nested deeper than this are not visited
pub const MAX_FRAME_DEPTH: usize = 8;

/// Node name of media elements in mutation records
const MEDIA_NODE: &str = "VIDEO";

/// One element found by a scan
#[derive(Clone)]
pub struct ScannedMedia {
    pub id: MediaId,
    pub element: MediaRef,
    pub checked: bool,
    /// Stamped during this scan
    pub newly_stamped: bool,
}

/// Outcome of a scan
#[derive(Default)]
pub struct ScanResult {
    /// Root first, then every inspectable frame holding media
    pub documents: Vec<DocumentRef>,
    /// Elements in scan order
    pub elements: Vec<ScannedMedia>,
    /// `src` of every frame encountered, inspectable or not
    pub frame_sources: Vec<String>,
    /// Frames skipped because they could not be inspected
    pub skipped_frames: usize,
}

impl ScanResult {
    pub fn ids(&self) -> Vec<MediaId> {
        self.elements.iter().map(|m| m.id.clone()).collect()
    }
}

/// Candidate scanner
#[derive(Debug, Clone)]
pub struct Scanner {
    max_depth: usize,
}

impl Default for Scanner {
    fn default() -> Self {
        Self {
            max_depth: MAX_FRAME_DEPTH,
        }
    }
}

impl Scanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_depth(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// Scan `root` and its frames with `selector`
    pub fn scan(&self, root: &DocumentRef, selector: &VideoSelector) -> ScanResult {
        let mut result = ScanResult::default();
        result.documents.push(root.clone());
        self.collect_frames(root, 1, &mut result);

        let mut seen = HashSet::new();
        for document in &result.documents {
            for element in document.query_media(selector) {
                let (id, newly_stamped) = stamp(&element);
                if !seen.insert(id.clone()) {
                    continue;
                }
                let checked = element.attribute(attr::ROLL_CHECK).as_deref() != Some("false");
                result.elements.push(ScannedMedia {
                    id,
                    element,
                    checked,
                    newly_stamped,
                });
            }
        }

        debug!(
            documents = result.documents.len(),
            elements = result.elements.len(),
            skipped_frames = result.skipped_frames,
            "Scan complete"
        );
        result
    }

    fn collect_frames(&self, document: &DocumentRef, depth: usize, result: &mut ScanResult) {
        if depth > self.max_depth {
            return;
        }
        for frame in document.frames() {
            result.frame_sources.push(frame.src.clone());
            match frame.content {
                Ok(nested) => {
                    if nested.media_count() > 0 {
                        result.documents.push(nested.clone());
                    }
                    self.collect_frames(&nested, depth + 1, result);
                }
                Err(err) => {
                    debug!(src = %frame.src, error = %err, "Frame skipped");
                    result.skipped_frames += 1;
                }
            }
        }
    }
}

/// Read the element's id, stamping a new one when absent
fn stamp(element: &MediaRef) -> (MediaId, bool) {
    if let Some(existing) = element.attribute(attr::ROLL_ID) {
        if !existing.is_empty() {
            return (MediaId(existing), false);
        }
    }
    let id = MediaId::generate();
    element.set_attribute(attr::ROLL_ID, id.as_str());
    element.set_attribute(attr::ROLL_CHECK, "true");
    (id, true)
}

/// A DOM mutation record as reported by the host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DocumentMutation {
    /// Node name of the mutation target
    pub target: String,
    /// Node names of added nodes
    pub added: Vec<String>,
    /// Node names of removed nodes
    pub removed: Vec<String>,
    /// Whether the target's subtree contains a media element
    pub target_has_media: bool,
}

impl DocumentMutation {
    /// Whether this mutation can change the candidate set
    pub fn is_media_change(&self) -> bool {
        let is_media = |name: &String| name.eq_ignore_ascii_case(MEDIA_NODE);
        is_media(&self.target)
            || self.added.iter().any(is_media)
            || self.removed.iter().any(is_media)
            || self.target_has_media
    }
}
