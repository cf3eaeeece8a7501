//! Deterministic prompt construction for initial and merge summarization
//! calls.

use gateway_memory::summary::DroppedEvent;

use crate::StructuredSummary;

const SYSTEM_PREAMBLE: &str = "You are compressing a coding-assistant conversation that has dropped out of \
the context window. Summarize only what is necessary to resume work.";

const SHAPE_INSTRUCTIONS: &str = r#"Output JSON with this exact shape and nothing else:
{
  "version": 1,
  "session_intent": "<one sentence>",
  "file_modifications": ["<path>", ...up to 12],
  "decisions_made": ["<decision>", ...up to 5],
  "next_steps": ["<step>", ...up to 5],
  "technical_details": "<up to 1500 chars>"
}"#;

pub fn build_initial_prompt(dropped: &[DroppedEvent], latest_intent: Option<&str>) -> String {
    let mut out = String::new();
    out.push_str(SYSTEM_PREAMBLE);
    out.push('\n');
    out.push_str(SHAPE_INSTRUCTIONS);
    out.push_str("\n\nDropped events:\n");
    for event in dropped {
        out.push_str(&format!("[{}] {}\n", event.role, event.text));
    }
    if let Some(intent) = latest_intent {
        out.push_str(&format!("\nLatest user intent: {intent}\n"));
    }
    out
}

pub fn build_merge_prompt(
    existing: &StructuredSummary,
    dropped: &[DroppedEvent],
    latest_intent: Option<&str>,
) -> String {
    let mut out = String::new();
    out.push_str(SYSTEM_PREAMBLE);
    out.push('\n');
    out.push_str(SHAPE_INSTRUCTIONS);
    out.push_str("\n\nExisting summary JSON:\n");
    out.push_str(&serde_json::to_string(existing).unwrap_or_default());
    out.push_str("\n\nNewly dropped events:\n");
    for event in dropped {
        out.push_str(&format!("[{}] {}\n", event.role, event.text));
    }
    if let Some(intent) = latest_intent {
        out.push_str(&format!("\nLatest user intent: {intent}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_prompt_includes_events_and_shape() {
        let dropped = vec![DroppedEvent { role: "user".into(), text: "hello".into() }];
        let prompt = build_initial_prompt(&dropped, Some("finish the task"));
        assert!(prompt.contains("hello"));
        assert!(prompt.contains("session_intent"));
        assert!(prompt.contains("finish the task"));
    }

    #[test]
    fn merge_prompt_carries_existing_json() {
        let existing = StructuredSummary { session_intent: "prior intent".into(), ..Default::default() };
        let prompt = build_merge_prompt(&existing, &[], None);
        assert!(prompt.contains("prior intent"));
    }
}
