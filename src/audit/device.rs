//! Coarse client classification from the user-agent string.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Mobile,
    Tablet,
    Desktop,
    Unknown,
}

/// Client metadata attached to every audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub kind: DeviceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl DeviceInfo {
    pub fn from_user_agent(user_agent: Option<&str>) -> Self {
        Self {
            kind: classify(user_agent),
            user_agent: user_agent.map(str::to_string),
        }
    }
}

// ============================================================================
// Regex
// ============================================================================

fn tablet_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)ipad|tablet|playbook|silk|kindle").expect("tablet regex is valid")
    })
}

fn mobile_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)mobi|iphone|ipod|blackberry|opera mini|iemobile|windows phone")
            .expect("mobile regex is valid")
    })
}

fn android_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)android").expect("android regex is valid"))
}

fn desktop_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)windows nt|macintosh|mac os x|x11|linux|cros")
            .expect("desktop regex is valid")
    })
}

/// Classify a user agent. Android without a "Mobile" token is a tablet.
pub fn classify(user_agent: Option<&str>) -> DeviceKind {
    let Some(ua) = user_agent.filter(|ua| !ua.trim().is_empty()) else {
        return DeviceKind::Unknown;
    };
    if tablet_regex().is_match(ua) {
        DeviceKind::Tablet
    } else if mobile_regex().is_match(ua) {
        DeviceKind::Mobile
    } else if android_regex().is_match(ua) {
        DeviceKind::Tablet
    } else if desktop_regex().is_match(ua) {
        DeviceKind::Desktop
    } else {
        DeviceKind::Unknown
    }
}
