//! Screen observations and the uiautomator dump parser.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Elements that make it into a screen summary.
const SUMMARY_ELEMENTS: usize = 10;

static NODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<node\b([^>]*)/?>").unwrap());
static ATTR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"([\w:-]+)="([^"]*)""#).unwrap());
static BOUNDS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"-?\d+").unwrap());
static FOCUS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Za-z][\w]*(?:\.[\w]+)+)/([\w.$]+)").unwrap());

/// One interactive element from the UI hierarchy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UiElement {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub content_desc: String,
    #[serde(default)]
    pub resource_id: String,
    #[serde(default)]
    pub class: String,
    /// Raw bounds, e.g. `[0,0][1080,200]`.
    #[serde(default)]
    pub bounds: String,
    #[serde(default)]
    pub package: String,
}

impl UiElement {
    /// Visible text, falling back to the content description.
    pub fn label(&self) -> Option<&str> {
        [self.text.as_str(), self.content_desc.as_str()]
            .into_iter()
            .map(str::trim)
            .find(|s| !s.is_empty())
    }

    /// Center of the element's bounds.
    pub fn center(&self) -> Option<(i64, i64)> {
        bounds_center(&self.bounds)
    }
}

/// Center of a bounds string such as `[10,20][110,220]`.
pub fn bounds_center(bounds: &str) -> Option<(i64, i64)> {
    let nums: Vec<i64> = BOUNDS_RE
        .find_iter(bounds)
        .filter_map(|m| m.as_str().parse().ok())
        .collect();
    if nums.len() >= 4 {
        Some(((nums[0] + nums[2]) / 2, (nums[1] + nums[3]) / 2))
    } else {
        None
    }
}

/// What the device showed at the start of a step. Read-only to the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub elements: Vec<UiElement>,
    /// Foreground package, when the transport could tell.
    pub current_package: Option<String>,
    /// Activity hint, e.g. `com.whatsapp/.HomeActivity`.
    pub screen_id: Option<String>,
    pub summary: String,
}

impl Observation {
    pub fn new(
        elements: Vec<UiElement>,
        current_package: Option<String>,
        screen_id: Option<String>,
    ) -> Self {
        let summary = summarize_screen(&elements);
        Self {
            timestamp: Utc::now(),
            elements,
            current_package,
            screen_id,
            summary,
        }
    }

    /// An observation with nothing on screen.
    pub fn empty() -> Self {
        Self::new(Vec::new(), None, None)
    }

    /// Whether any element label contains `needle` (case-insensitive).
    pub fn mentions(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.summary.to_lowercase().contains(&needle)
            || self.elements.iter().any(|e| {
                e.label()
                    .map_or(false, |l| l.to_lowercase().contains(&needle))
                    || e.resource_id.to_lowercase().contains(&needle)
            })
    }

    /// Normalized textual rendering used for fingerprints and reasoning context.
    ///
    /// Depends only on package, screen id and element labels, so two captures
    /// of the same screen render identically.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(pkg) = &self.current_package {
            out.push_str("package: ");
            out.push_str(pkg);
            out.push('\n');
        }
        if let Some(screen) = &self.screen_id {
            out.push_str("screen: ");
            out.push_str(screen);
            out.push('\n');
        }
        out.push_str(&self.summary);
        for element in &self.elements {
            let label = element.label().unwrap_or("");
            if label.is_empty() && element.resource_id.is_empty() {
                continue;
            }
            out.push_str(&format!(
                "\n- {} [{}] {} @{}",
                label.to_lowercase(),
                short_class(&element.class),
                element.resource_id,
                element.bounds
            ));
        }
        out
    }
}

fn short_class(class: &str) -> &str {
    class.rsplit('.').next().unwrap_or(class)
}

/// "Screen with: a, b, c" from the first labelled elements.
pub fn summarize_screen(elements: &[UiElement]) -> String {
    let texts: Vec<&str> = elements
        .iter()
        .take(SUMMARY_ELEMENTS)
        .filter_map(UiElement::label)
        .collect();
    if texts.is_empty() {
        "Screen with no visible text".to_string()
    } else {
        format!("Screen with: {}", texts.join(", "))
    }
}

/// Extract clickable nodes from a `uiautomator dump` XML document.
pub fn parse_ui_dump(xml: &str) -> Vec<UiElement> {
    NODE_RE
        .captures_iter(xml)
        .filter_map(|caps| {
            let attrs: HashMap<&str, String> = ATTR_RE
                .captures_iter(caps.get(1)?.as_str())
                .filter_map(|a| Some((a.get(1)?.as_str(), unescape(a.get(2)?.as_str()))))
                .collect();

            if attrs.get("clickable").map(String::as_str) != Some("true") {
                return None;
            }

            let get = |key: &str| attrs.get(key).cloned().unwrap_or_default();
            Some(UiElement {
                text: get("text"),
                content_desc: get("content-desc"),
                resource_id: get("resource-id"),
                class: get("class"),
                bounds: get("bounds"),
                package: get("package"),
            })
        })
        .collect()
}

/// Focused `(package, package/activity)` from `dumpsys window` output.
pub fn parse_focused_window(dumpsys: &str) -> Option<(String, String)> {
    dumpsys
        .lines()
        .filter(|line| line.contains("mCurrentFocus") || line.contains("mFocusedApp"))
        .find_map(|line| {
            let caps = FOCUS_RE.captures(line)?;
            let package = caps.get(1)?.as_str().to_string();
            let activity = caps.get(2)?.as_str();
            Some((package.clone(), format!("{}/{}", package, activity)))
        })
}

fn unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#10;", " ")
        .replace("&amp;", "&")
}
