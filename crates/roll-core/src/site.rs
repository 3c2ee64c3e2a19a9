//! Site-specific media selectors
//!
//! Most pages expose their player as a plain `<video>`; a few need a more
//! specific query or carry an ad signal that the ad-skip watcher follows.

use serde::{Deserialize, Serialize};

/// Query used by the scanner to find media elements in a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSelector {
    /// CSS-like query evaluated against each document
    pub default_dom: String,
    /// Host element whose shadow root holds the media element
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shadow_dom: Option<String>,
    /// Wrapper element of the player
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrap_dom: Option<String>,
}

impl Default for VideoSelector {
    fn default() -> Self {
        Self::new("video")
    }
}

impl VideoSelector {
    pub fn new(default_dom: impl Into<String>) -> Self {
        Self {
            default_dom: default_dom.into(),
            shadow_dom: None,
            wrap_dom: None,
        }
    }

    pub fn with_shadow(mut self, host: impl Into<String>) -> Self {
        self.shadow_dom = Some(host.into());
        self
    }

    pub fn with_wrap(mut self, wrap: impl Into<String>) -> Self {
        self.wrap_dom = Some(wrap.into());
        self
    }
}

/// Page-level "ad showing" signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdSignal {
    /// Player container observed for class changes
    pub container: String,
    /// Selector that matches while an ad is on screen
    pub showing: String,
}

/// Known site with its selector and optional ad signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteProfile {
    /// Host fragment matched with `contains`
    pub host: &'static str,
    pub name: &'static str,
    pub selector: VideoSelector,
    pub ad_signal: Option<AdSignal>,
}

/// Built-in site table
pub fn site_profiles() -> Vec<SiteProfile> {
    vec![
        SiteProfile {
            host: "youtube.com",
            name: "YouTube",
            selector: VideoSelector::new("video").with_wrap("#movie_player"),
            ad_signal: Some(AdSignal {
                container: "#player".to_string(),
                showing: ".html5-video-player.ad-showing.ad-interrupting".to_string(),
            }),
        },
        SiteProfile {
            host: "bilibili.com",
            name: "bilibili",
            selector: VideoSelector::new("video").with_wrap(".bpx-player-video-wrap"),
            ad_signal: None,
        },
        SiteProfile {
            host: "twitch.tv",
            name: "Twitch",
            selector: VideoSelector::new("video").with_wrap(".video-player__container"),
            ad_signal: None,
        },
        SiteProfile {
            host: "instagram.com",
            name: "Instagram",
            selector: VideoSelector::new("video"),
            ad_signal: None,
        },
    ]
}

/// Profile whose host fragment occurs in `host_name`
pub fn profile_for_host(host_name: &str) -> Option<SiteProfile> {
    if host_name.is_empty() {
        return None;
    }
    site_profiles()
        .into_iter()
        .find(|profile| host_name.contains(profile.host))
}

/// Selector for `host_name`, `video` when the site is unknown
pub fn selector_for_host(host_name: &str) -> VideoSelector {
    profile_for_host(host_name)
        .map(|profile| profile.selector)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_default() {
        assert_eq!(selector_for_host(""), VideoSelector::new("video"));
        assert_eq!(selector_for_host("example.org"), VideoSelector::new("video"));
    }

    #[test]
    fn test_known_site() {
        let profile = profile_for_host("www.youtube.com").unwrap();
        assert_eq!(profile.name, "YouTube");
        assert!(profile.ad_signal.is_some());
        assert_eq!(profile.selector.wrap_dom.as_deref(), Some("#movie_player"));
    }

    #[test]
    fn test_selector_json() {
        let json = serde_json::to_string(&VideoSelector::default()).unwrap();
        assert_eq!(json, r#"{"defaultDom":"video"}"#);
    }
}
