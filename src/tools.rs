use serde_json::Value;

use crate::session::{SequenceStep, ToolCall};

pub const GENERATE_SEQUENCE: &str = "generate_sequence";
pub const REFINE_SEQUENCE_STEP: &str = "refine_sequence_step";
pub const ANALYZE_SEQUENCE: &str = "analyze_sequence";

/// A backend tool call, classified.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    /// A freshly generated sequence; the payload is the raw tool result.
    GenerateSequence { call: ToolCall, payload: Value },
    /// One refined step, without the rest of the sequence.
    RefineSequenceStep { call: ToolCall, step: SequenceStep },
    Failed { name: String, error: String },
    Other { name: String },
}

impl ToolOutcome {
    pub fn classify(call: &ToolCall) -> Self {
        if let Some(error) = result_error(call.result.as_ref()) {
            return ToolOutcome::Failed { name: call.name.clone(), error };
        }
        match (call.name.as_str(), call.result.as_ref()) {
            (GENERATE_SEQUENCE, Some(result)) if result.is_object() => {
                ToolOutcome::GenerateSequence { call: call.clone(), payload: result.clone() }
            }
            (REFINE_SEQUENCE_STEP, Some(result)) => match serde_json::from_value::<SequenceStep>(result.clone()) {
                Ok(step) => ToolOutcome::RefineSequenceStep { call: call.clone(), step },
                Err(_) => ToolOutcome::Other { name: call.name.clone() },
            },
            _ => ToolOutcome::Other { name: call.name.clone() },
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ToolOutcome::GenerateSequence { call, .. } | ToolOutcome::RefineSequenceStep { call, .. } => &call.name,
            ToolOutcome::Failed { name, .. } | ToolOutcome::Other { name } => name,
        }
    }
}

fn result_error(result: Option<&Value>) -> Option<String> {
    let err = result?.as_object()?.get("error")?;
    Some(match err {
        Value::String(s) => s.clone(),
        Value::Null => "unknown error".into(),
        other => other.to_string(),
    })
}

pub fn display_name(name: &str) -> String {
    match name {
        GENERATE_SEQUENCE => "sequence generator".into(),
        REFINE_SEQUENCE_STEP => "step refiner".into(),
        ANALYZE_SEQUENCE => "sequence analyzer".into(),
        other => other.replace('_', " "),
    }
}

pub fn using_message(name: &str) -> String {
    format!("Using tool: {}...", display_name(name))
}

pub fn failed_message(name: &str, error: &str) -> String {
    format!("Tool {} failed: {}", display_name(name), error)
}

pub fn completed_message(name: &str) -> String {
    format!("Tool {} completed successfully", display_name(name))
}
