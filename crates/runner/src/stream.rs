//! Line parser for the Claude CLI `stream-json` output format.
//!
//! The CLI writes one JSON object per line. Only two kinds matter here:
//! `assistant` messages (whose `content` blocks of type `text` are
//! concatenated into a chunk) and the final `result` message. Everything
//! else, including malformed lines, is skipped.

use serde::Deserialize;

/// One meaningful line from the stream.
#[derive(Debug, PartialEq)]
pub enum StreamLine {
    /// Concatenated text blocks of an `assistant` message. May be empty
    /// when the message carried no text blocks.
    Assistant(String),
    /// The final `result` payload.
    FinalResult(String),
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: String,
}

/// Parse one stdout line. Returns `None` for unknown kinds and lines that
/// are not valid JSON objects.
pub fn parse_line(line: &str) -> Option<StreamLine> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;

    match value.get("type")?.as_str()? {
        "assistant" => {
            let text = value
                .get("content")
                .map(extract_assistant_text)
                .unwrap_or_default();
            Some(StreamLine::Assistant(text))
        }
        "result" => {
            let result = value.get("result")?.as_str()?;
            Some(StreamLine::FinalResult(result.to_string()))
        }
        _ => None,
    }
}

/// Concatenate the `text` of every `type: "text"` block. A `content` value
/// that is not a block array yields an empty string.
fn extract_assistant_text(content: &serde_json::Value) -> String {
    let Ok(blocks) = serde_json::from_value::<Vec<ContentBlock>>(content.clone()) else {
        return String::new();
    };
    blocks
        .into_iter()
        .filter(|b| b.kind == "text")
        .map(|b| b.text)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_text_blocks_are_concatenated() {
        let line = r#"{"type":"assistant","content":[{"type":"text","text":"Hel"},{"type":"text","text":"lo"}]}"#;
        assert_eq!(
            parse_line(line),
            Some(StreamLine::Assistant("Hello".to_string()))
        );
    }

    #[test]
    fn non_text_blocks_are_ignored() {
        let line = r#"{"type":"assistant","content":[{"type":"tool_use","id":"x"},{"type":"text","text":"hi"}]}"#;
        assert_eq!(parse_line(line), Some(StreamLine::Assistant("hi".to_string())));
    }

    #[test]
    fn result_line_is_captured() {
        let line = r#"{"type":"result","result":"final answer"}"#;
        assert_eq!(
            parse_line(line),
            Some(StreamLine::FinalResult("final answer".to_string()))
        );
    }

    #[test]
    fn result_with_non_string_payload_is_skipped() {
        assert_eq!(parse_line(r#"{"type":"result","result":42}"#), None);
    }

    #[test]
    fn unknown_kinds_are_skipped() {
        assert_eq!(parse_line(r#"{"type":"system","subtype":"init"}"#), None);
        assert_eq!(parse_line(r#"{"type":"user"}"#), None);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        assert_eq!(parse_line("not json"), None);
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line(r#"{"no_type":true}"#), None);
    }

    #[test]
    fn assistant_without_content_is_empty_text() {
        assert_eq!(
            parse_line(r#"{"type":"assistant"}"#),
            Some(StreamLine::Assistant(String::new()))
        );
    }

    #[test]
    fn assistant_with_non_array_content_is_empty_text() {
        assert_eq!(
            parse_line(r#"{"type":"assistant","content":"oops"}"#),
            Some(StreamLine::Assistant(String::new()))
        );
    }
}
