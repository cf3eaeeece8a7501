//! Provider-agnostic extraction of assistant text from a raw response
//! payload. The probe order is fixed and documented so provider reshuffles
//! don't change behavior silently (§9 design note).

use serde_json::Value;

/// Extracts assistant text from `bytes`, trying in order: OpenAI chat/completion
/// shapes, Anthropic shapes, Gemini shapes, a handful of generic top-level
/// keys, then falling back to the raw bytes as UTF-8.
pub fn extract_assistant_text(bytes: &[u8]) -> String {
    let Ok(value) = serde_json::from_slice::<Value>(bytes) else {
        return String::from_utf8_lossy(bytes).into_owned();
    };

    if let Some(text) = extract_openai(&value) {
        return text;
    }
    if let Some(text) = extract_anthropic(&value) {
        return text;
    }
    if let Some(text) = extract_gemini(&value) {
        return text;
    }
    if let Some(text) = extract_generic(&value) {
        return text;
    }
    String::from_utf8_lossy(bytes).into_owned()
}

fn extract_openai(value: &Value) -> Option<String> {
    let choice = value.get("choices")?.get(0)?;
    if let Some(s) = choice.pointer("/message/content").and_then(Value::as_str) {
        return Some(s.to_string());
    }
    if let Some(s) = choice.pointer("/delta/content").and_then(Value::as_str) {
        return Some(s.to_string());
    }
    if let Some(s) = choice.get("text").and_then(Value::as_str) {
        return Some(s.to_string());
    }
    None
}

fn extract_anthropic(value: &Value) -> Option<String> {
    if let Some(blocks) = value.get("content").and_then(Value::as_array) {
        for block in blocks {
            if block.get("type").and_then(Value::as_str) == Some("text") {
                if let Some(s) = block.get("text").and_then(Value::as_str) {
                    return Some(s.to_string());
                }
            }
        }
    }
    if let Some(s) = value.get("completion").and_then(Value::as_str) {
        return Some(s.to_string());
    }
    None
}

fn extract_gemini(value: &Value) -> Option<String> {
    if let Some(s) = value
        .pointer("/candidates/0/content/parts/0/text")
        .and_then(Value::as_str)
    {
        return Some(s.to_string());
    }
    if let Some(s) = value.pointer("/candidates/0/output").and_then(Value::as_str) {
        return Some(s.to_string());
    }
    if let Some(s) = value.get("text").and_then(Value::as_str) {
        return Some(s.to_string());
    }
    None
}

fn extract_generic(value: &Value) -> Option<String> {
    for key in ["content", "text", "response", "output", "result"] {
        if let Some(s) = value.get(key).and_then(Value::as_str) {
            return Some(s.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_openai_message_content() {
        let bytes = br#"{"choices":[{"message":{"content":"hello"}}]}"#;
        assert_eq!(extract_assistant_text(bytes), "hello");
    }

    #[test]
    fn extracts_openai_delta_content() {
        let bytes = br#"{"choices":[{"delta":{"content":"partial"}}]}"#;
        assert_eq!(extract_assistant_text(bytes), "partial");
    }

    #[test]
    fn extracts_anthropic_text_block() {
        let bytes = br#"{"content":[{"type":"text","text":"anthro"}]}"#;
        assert_eq!(extract_assistant_text(bytes), "anthro");
    }

    #[test]
    fn extracts_gemini_candidate_text() {
        let bytes = br#"{"candidates":[{"content":{"parts":[{"text":"gem"}]}}]}"#;
        assert_eq!(extract_assistant_text(bytes), "gem");
    }

    #[test]
    fn falls_back_to_generic_and_raw_bytes() {
        let bytes = br#"{"output":"generic-output"}"#;
        assert_eq!(extract_assistant_text(bytes), "generic-output");
        let raw = b"plain text, not json";
        assert_eq!(extract_assistant_text(raw), "plain text, not json");
    }
}
