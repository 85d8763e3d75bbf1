//! Mapping of reasoning-backend responses onto the action plan schema.
//!
//! Expected shape:
//!
//! ```json
//! {
//!     "reasoning": "...",
//!     "action_plan": [
//!         {"id": "a1", "capability": "tap", "params": {"x": 10, "y": 20}, "depends_on": []}
//!     ],
//!     "confidence": 0.8
//! }
//! ```
//!
//! Anything that does not fit is rejected; nothing is coerced into a plan.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use super::capabilities::lookup;
use super::plan::{clamp_confidence, Action, ActionPlan, PlanSource, RiskLevel};

/// Parse a model response into a plan with `source = model`.
///
/// Actions without an `id` get `a<position>` (1-based). Numeric
/// `depends_on` entries refer to those positional ids. The declared risk can
/// raise, never lower, the catalog risk of a capability.
pub fn parse_model_plan(response: &Value) -> Result<ActionPlan, String> {
    let obj = response
        .as_object()
        .ok_or_else(|| "Response is not a JSON object".to_string())?;

    let raw_actions = obj
        .get("action_plan")
        .ok_or_else(|| "Missing 'action_plan'".to_string())?
        .as_array()
        .ok_or_else(|| "'action_plan' is not an array".to_string())?;

    let confidence = match obj.get("confidence") {
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| "'confidence' is not a number".to_string())? as f32,
        Some(Value::String(s)) => s
            .trim()
            .parse::<f32>()
            .map_err(|_| format!("'confidence' is not a number: {}", s))?,
        Some(other) => return Err(format!("'confidence' is not a number: {}", other)),
        None => return Err("Missing 'confidence'".to_string()),
    };
    if !(0.0..=1.0).contains(&confidence) {
        return Err(format!("'confidence' out of range: {}", confidence));
    }

    let rationale = obj
        .get("reasoning")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let actions = raw_actions
        .iter()
        .enumerate()
        .map(|(index, raw)| parse_action(index, raw))
        .collect::<Result<Vec<_>, _>>()?;

    let plan = ActionPlan::new(PlanSource::Model, actions, clamp_confidence(confidence))
        .with_rationale(rationale);
    plan.check_references()?;
    Ok(plan)
}

fn parse_action(index: usize, raw: &Value) -> Result<Action, String> {
    let obj = raw
        .as_object()
        .ok_or_else(|| format!("Action #{} is not an object", index + 1))?;

    let capability = obj
        .get("capability")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("Action #{} has no capability", index + 1))?;

    let spec = lookup(capability)
        .ok_or_else(|| format!("Action #{} uses unknown capability '{}'", index + 1, capability))?;

    let id = match obj.get("id") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::Number(n)) => format!("a{}", n),
        _ => positional_id(index),
    };

    let params = match obj.get("params") {
        Some(Value::Object(map)) => map.clone(),
        None | Some(Value::Null) => Map::new(),
        Some(other) => {
            return Err(format!(
                "Action #{} params must be an object, got {}",
                index + 1,
                other
            ))
        }
    };

    let depends_on = match obj.get("depends_on") {
        None | Some(Value::Null) => BTreeSet::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| dependency_id(index, item))
            .collect::<Result<BTreeSet<_>, _>>()?,
        Some(single) => std::iter::once(dependency_id(index, single)?).collect(),
    };
    if depends_on.contains(&id) {
        return Err(format!("Action {} depends on itself", id));
    }

    let declared = match obj.get("risk").or_else(|| obj.get("risk_level")) {
        Some(Value::String(label)) => RiskLevel::parse(label),
        _ => None,
    };
    let risk_level = declared.map_or(spec.risk, |d| d.max(spec.risk));

    Ok(Action {
        id,
        capability: spec.name.to_string(),
        params,
        depends_on,
        risk_level,
    })
}

fn positional_id(index: usize) -> String {
    format!("a{}", index + 1)
}

fn dependency_id(index: usize, item: &Value) -> Result<String, String> {
    match item {
        Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Value::Number(n) => Ok(format!("a{}", n)),
        other => Err(format!(
            "Action #{} has an invalid dependency: {}",
            index + 1,
            other
        )),
    }
}
