//! Catalog of device capabilities the planner may use.

use super::plan::{Action, RiskLevel};

/// A capability the device transport understands.
#[derive(Debug, Clone, Copy)]
pub struct CapabilitySpec {
    pub name: &'static str,
    pub description: &'static str,
    pub params: &'static str,
    pub risk: RiskLevel,
}

/// Every capability known to the mission loop.
pub static CAPABILITIES: &[CapabilitySpec] = &[
    CapabilitySpec {
        name: "tap",
        description: "Tap at (x, y) or at the center of a UI element's bounds",
        params: "x, y | element{bounds}",
        risk: RiskLevel::Low,
    },
    CapabilitySpec {
        name: "type",
        description: "Type text into the focused field",
        params: "text",
        risk: RiskLevel::Medium,
    },
    CapabilitySpec {
        name: "swipe",
        description: "Swipe from (x1, y1) to (x2, y2)",
        params: "x1, y1, x2, y2, duration?",
        risk: RiskLevel::Low,
    },
    CapabilitySpec {
        name: "back",
        description: "Press the back button",
        params: "",
        risk: RiskLevel::Low,
    },
    CapabilitySpec {
        name: "home",
        description: "Press the home button",
        params: "",
        risk: RiskLevel::Low,
    },
    CapabilitySpec {
        name: "open_app",
        description: "Launch an app by name or package",
        params: "package | app_name",
        risk: RiskLevel::Low,
    },
    CapabilitySpec {
        name: "wait",
        description: "Wait before the next observation",
        params: "seconds?",
        risk: RiskLevel::Low,
    },
    CapabilitySpec {
        name: "get_ui",
        description: "Dump the current UI hierarchy",
        params: "",
        risk: RiskLevel::Low,
    },
    CapabilitySpec {
        name: "get_secret",
        description: "Fetch stored credentials for a service",
        params: "service",
        risk: RiskLevel::High,
    },
];

/// Look up a capability by name.
pub fn lookup(name: &str) -> Option<&'static CapabilitySpec> {
    CAPABILITIES.iter().find(|c| c.name == name)
}

/// Catalog risk for a capability.
pub fn default_risk(name: &str) -> Option<RiskLevel> {
    lookup(name).map(|c| c.risk)
}

/// One line per capability, for the reasoning context.
pub fn render_catalog() -> String {
    CAPABILITIES
        .iter()
        .map(|c| {
            if c.params.is_empty() {
                format!("- {} ({}): {}", c.name, c.risk.as_str(), c.description)
            } else {
                format!(
                    "- {} ({}): {} [params: {}]",
                    c.name,
                    c.risk.as_str(),
                    c.description,
                    c.params
                )
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Check an action carries the parameters its capability needs.
///
/// Runs right before dispatch; a failure fails that action only.
pub fn validate_params(action: &Action) -> Result<(), String> {
    match action.capability.as_str() {
        "tap" => {
            let has_xy = action.param_i64("x").is_some() && action.param_i64("y").is_some();
            if !has_xy && !action.params.contains_key("element") {
                return Err(
                    "Action 'tap' requires either 'x' and 'y' coordinates or an 'element'".into(),
                );
            }
        }
        "type" => {
            if action.param_str("text").map_or(true, str::is_empty) {
                return Err("Action 'type' requires a non-empty 'text' parameter".into());
            }
        }
        "swipe" => {
            for key in ["x1", "y1", "x2", "y2"] {
                if action.param_i64(key).is_none() {
                    return Err(format!("Action 'swipe' requires '{}'", key));
                }
            }
        }
        "open_app" => {
            if action.param_str("package").is_none() && action.param_str("app_name").is_none() {
                return Err("Action 'open_app' requires 'package' or 'app_name'".into());
            }
        }
        "get_secret" => {
            if action.param_str("service").is_none() {
                return Err("Action 'get_secret' requires 'service'".into());
            }
        }
        _ => {}
    }
    Ok(())
}
