//! Regex-based summary fallback, used when the LLM executor times out,
//! errors, or returns an unparseable response.

use std::sync::LazyLock;

use gateway_memory::summary::DroppedEvent;
use regex::Regex;

use crate::StructuredSummary;

const MAX_PATHS: usize = 12;
const MAX_DECISIONS: usize = 5;
const MAX_TECHNICAL_CHARS: usize = 1500;

static LABELED_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:file|path|modified|created|edited|deleted|updated)[:=\s]+"?([/\\]?[\w./\\-]+\.\w+)"?"#)
        .expect("valid labeled path regex")
});

static ABSOLUTE_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z]:)?[/\\][\w./\\-]+\.\w+").expect("valid absolute path regex")
});

static DECISION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)decid|chose|will use|going to").expect("valid decision regex"));

static FENCED_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[a-zA-Z0-9_+-]*\n(.*?)```").expect("valid fenced code regex"));

/// Carries `existing` forward (if any) and harvests file paths, decision-like
/// assistant messages, and technical details from `dropped` via regex.
pub fn regex_fallback(
    existing: Option<&StructuredSummary>,
    dropped: &[DroppedEvent],
    latest_intent: Option<&str>,
) -> StructuredSummary {
    let mut summary = existing.cloned().unwrap_or_default();
    if summary.session_intent.is_empty() {
        summary.session_intent = latest_intent.unwrap_or_default().to_string();
    }

    for event in dropped {
        for caps in LABELED_PATH_RE.captures_iter(&event.text) {
            let path = caps[1].to_string();
            push_path(&mut summary.file_modifications, &path);
        }
        for line in event.text.lines() {
            if let Some(m) = ABSOLUTE_PATH_RE.find(line.trim()) {
                push_path(&mut summary.file_modifications, m.as_str());
            }
        }
        summary.file_modifications.truncate(MAX_PATHS);
    }

    for event in dropped {
        if event.role == "assistant" && DECISION_RE.is_match(&event.text) {
            if summary.decisions_made.len() >= MAX_DECISIONS {
                break;
            }
            if !summary.decisions_made.contains(&event.text) {
                summary.decisions_made.push(event.text.clone());
            }
        }
    }

    let mut technical = summary.technical_details.clone();
    for event in dropped {
        if technical.len() >= MAX_TECHNICAL_CHARS {
            break;
        }
        if event.type_is_tool_result() {
            append_capped(&mut technical, &event.text, MAX_TECHNICAL_CHARS);
        }
        for caps in FENCED_CODE_RE.captures_iter(&event.text) {
            if technical.len() >= MAX_TECHNICAL_CHARS {
                break;
            }
            append_capped(&mut technical, &caps[1], MAX_TECHNICAL_CHARS);
        }
    }
    summary.technical_details = technical;

    summary
}

fn push_path(paths: &mut Vec<String>, path: &str) {
    let derived = derive_action(path);
    if !paths.iter().any(|p| p == &derived) {
        paths.push(derived);
    }
}

fn derive_action(path: &str) -> String {
    let lower = path.to_lowercase();
    if lower.contains("creat") || lower.contains("new") {
        format!("{path} (created)")
    } else if lower.contains("delet") || lower.contains("remov") {
        format!("{path} (deleted)")
    } else {
        path.to_string()
    }
}

fn append_capped(dest: &mut String, addition: &str, max_chars: usize) {
    let remaining = max_chars.saturating_sub(dest.chars().count());
    if remaining == 0 {
        return;
    }
    if !dest.is_empty() {
        dest.push('\n');
    }
    let trimmed: String = addition.trim().chars().take(remaining).collect();
    dest.push_str(&trimmed);
}

trait ToolResultLike {
    fn type_is_tool_result(&self) -> bool;
}

impl ToolResultLike for DroppedEvent {
    fn type_is_tool_result(&self) -> bool {
        self.role == "tool"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_labeled_file_path() {
        let dropped = vec![DroppedEvent { role: "assistant".into(), text: "modified: src/main.rs".into() }];
        let summary = regex_fallback(None, &dropped, None);
        assert!(summary.file_modifications.iter().any(|p| p.contains("src/main.rs")));
    }

    #[test]
    fn derives_created_action() {
        let dropped = vec![DroppedEvent { role: "assistant".into(), text: "created: src/new_module.rs".into() }];
        let summary = regex_fallback(None, &dropped, None);
        assert!(summary.file_modifications.iter().any(|p| p.contains("(created)")));
    }

    #[test]
    fn harvests_decision_like_messages() {
        let dropped = vec![
            DroppedEvent { role: "assistant".into(), text: "I decided to use postgres".into() },
            DroppedEvent { role: "user".into(), text: "ok sounds good".into() },
        ];
        let summary = regex_fallback(None, &dropped, None);
        assert_eq!(summary.decisions_made.len(), 1);
        assert!(summary.decisions_made[0].contains("postgres"));
    }

    #[test]
    fn carries_over_existing_summary() {
        let existing = StructuredSummary { session_intent: "build the thing".into(), ..Default::default() };
        let summary = regex_fallback(Some(&existing), &[], None);
        assert_eq!(summary.session_intent, "build the thing");
    }
}
