//! System prompt for the reasoning backend.

use chrono::Local;

/// Output contract given to the reasoning backend.
pub static REASONING_PROMPT: &str = r#"You are an autonomous Android agent. You observe the screen as a list of
UI elements and decide the next actions toward the user's goal.

Reply with a single JSON object:
{
    "reasoning": "short analysis of the current screen",
    "action_plan": [
        {
            "id": "a1",
            "capability": "capability_name",
            "params": {"param_key": "param_value"},
            "depends_on": []
        }
    ],
    "confidence": 0.85
}

Rules:
1. Use ONLY the capabilities listed below and only their parameters.
2. "depends_on" lists ids of earlier actions in the same plan that must succeed first.
3. If an action failed before, try a different approach instead of repeating it.
4. Skill hints are advisory context; you decide.
5. Return an empty "action_plan" when the goal is already satisfied."#;

/// Build the system context for one reasoning call.
///
/// # Arguments
/// * `capabilities` - Rendered capability list (one per line).
pub fn build_system_prompt(capabilities: &str) -> String {
    let today = Local::now().format("%B %d, %Y");
    format!(
        "Today's date is: {}\n{}\n\nCapabilities:\n{}",
        today, REASONING_PROMPT, capabilities
    )
}
