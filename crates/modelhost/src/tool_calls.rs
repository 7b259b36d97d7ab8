//! Tool-call extraction from completed model output.
//!
//! Local models express function invocations in four textual conventions:
//! an inline JSON object with a `tool_calls` array, a `<function_calls>`
//! block with a single `<function=name>` tag, the same block with nested
//! `<invoke>` elements, and a `functools[...]` bracketed list. Detectors run
//! in that fixed priority order; the first whose trigger matches wins, and
//! conventions never combine within one response.
//!
//! Extraction is exception-free for any input. A matched block with a
//! malformed payload degrades to plain prose with no calls: models emit
//! ordinary free text containing incidental control characters, and that
//! must never fail a request.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;
use uuid::Uuid;

use crate::protocol::{FunctionCall, ToolCall};

const TOOL_CALLS_KEY: &str = "tool_calls";
const CALL_BLOCK_OPEN: &str = "<function_calls>";
const CALL_BLOCK_CLOSE: &str = "</function_calls>";
const FUNCTOOLS_MARKER: &str = "functools[";

enum Detection {
    /// Trigger pattern absent; try the next convention.
    NoTrigger,
    Parsed {
        cleaned: String,
        calls: Vec<ToolCall>,
    },
    /// Trigger matched but the payload did not parse; the whole text is
    /// returned as prose.
    Malformed,
}

/// Scan completed output for tool invocations. Returns the prose with the
/// matched block removed (trimmed) and the calls in order of appearance.
pub fn extract_tool_calls(text: &str) -> (String, Vec<ToolCall>) {
    let detectors: [fn(&str) -> Detection; 4] = [
        try_inline_json,
        try_legacy_tag,
        try_structured_tag,
        try_bracketed_list,
    ];
    for detector in detectors {
        match detector(text) {
            Detection::NoTrigger => continue,
            Detection::Parsed { cleaned, calls } => return (cleaned, calls),
            Detection::Malformed => return (text.trim().to_string(), Vec::new()),
        }
    }
    (text.trim().to_string(), Vec::new())
}

fn new_tool_call(name: &str, arguments: String) -> ToolCall {
    ToolCall {
        id: format!("call_{}", Uuid::new_v4().simple()),
        call_type: "function".to_string(),
        function: FunctionCall {
            name: name.to_string(),
            arguments,
        },
    }
}

fn join_prose(before: &str, after: &str) -> String {
    let (before, after) = (before.trim(), after.trim());
    if before.is_empty() {
        after.to_string()
    } else if after.is_empty() {
        before.to_string()
    } else {
        format!("{}\n{}", before, after)
    }
}

/// Convention 1: the first syntactically valid JSON object anywhere in the
/// text that carries a `tool_calls` array of `{name, arguments}` entries.
fn try_inline_json(text: &str) -> Detection {
    for (start, _) in text.char_indices().filter(|(_, c)| *c == '{') {
        let Some(end) = balanced_span_end(text, start, '{', '}') else {
            continue;
        };
        let Ok(Value::Object(object)) = serde_json::from_str::<Value>(&text[start..end]) else {
            continue;
        };
        let Some(Value::Array(entries)) = object.get(TOOL_CALLS_KEY) else {
            continue;
        };
        let Some(calls) = calls_from_entries(entries) else {
            return Detection::Malformed;
        };
        return Detection::Parsed {
            cleaned: join_prose(&text[..start], &text[end..]),
            calls,
        };
    }
    Detection::NoTrigger
}

/// Convention 2: a `<function_calls>` block holding exactly one
/// `<function=name>{json}</function>` tag.
fn try_legacy_tag(text: &str) -> Detection {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?s)<function_calls>\s*<function=([^>]+)>(.*?)</function>\s*</function_calls>")
            .expect("legacy tag pattern")
    });
    let Some(caps) = re.captures(text) else {
        return Detection::NoTrigger;
    };
    let span = caps.get(0).map(|m| (m.start(), m.end())).unwrap_or_default();
    let name = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
    let payload = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();

    let Ok(arguments @ Value::Object(_)) = serde_json::from_str::<Value>(payload) else {
        return Detection::Malformed;
    };
    let Ok(arguments) = serde_json::to_string(&arguments) else {
        return Detection::Malformed;
    };
    Detection::Parsed {
        cleaned: join_prose(&text[..span.0], &text[span.1..]),
        calls: vec![new_tool_call(name, arguments)],
    }
}

/// Convention 3: a `<function_calls>` block holding one or more `<invoke>`
/// elements, each with a `<tool_name>` and sibling argument tags. Argument
/// values stay raw strings; no type coercion.
fn try_structured_tag(text: &str) -> Detection {
    static INVOKE_RE: OnceLock<Regex> = OnceLock::new();
    let invoke_re = INVOKE_RE
        .get_or_init(|| Regex::new(r"(?s)<invoke>(.*?)</invoke>").expect("invoke pattern"));

    let Some(block_start) = text.find(CALL_BLOCK_OPEN) else {
        return Detection::NoTrigger;
    };
    if !text.contains("<invoke>") {
        return Detection::NoTrigger;
    }
    let Some(close_offset) = text[block_start..].find(CALL_BLOCK_CLOSE) else {
        return Detection::Malformed;
    };
    let block_end = block_start + close_offset + CALL_BLOCK_CLOSE.len();
    let block = &text[block_start..block_end];

    let mut calls = Vec::new();
    for caps in invoke_re.captures_iter(block) {
        let body = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let Some((name, arguments)) = parse_invoke_fields(body) else {
            return Detection::Malformed;
        };
        let Ok(arguments) = serde_json::to_string(&Value::Object(arguments)) else {
            return Detection::Malformed;
        };
        calls.push(new_tool_call(&name, arguments));
    }
    if calls.is_empty() {
        return Detection::Malformed;
    }
    Detection::Parsed {
        cleaned: join_prose(&text[..block_start], &text[block_end..]),
        calls,
    }
}

/// Pull `<tool_name>` and the sibling argument tags out of one invoke body.
fn parse_invoke_fields(body: &str) -> Option<(String, Map<String, Value>)> {
    static OPEN_RE: OnceLock<Regex> = OnceLock::new();
    let open_re =
        OPEN_RE.get_or_init(|| Regex::new(r"<([A-Za-z0-9_]+)>").expect("field open pattern"));

    let mut name = None;
    let mut arguments = Map::new();
    let mut rest = body;
    while let Some(caps) = open_re.captures(rest) {
        let open = caps.get(0)?;
        let tag = caps.get(1)?.as_str();
        let close = format!("</{}>", tag);
        let after = &rest[open.end()..];
        let close_pos = after.find(&close)?;
        let value = after[..close_pos].trim();
        if tag == "tool_name" {
            name = Some(value.to_string());
        } else {
            arguments.insert(tag.to_string(), Value::String(value.to_string()));
        }
        rest = &after[close_pos + close.len()..];
    }
    name.map(|name| (name, arguments))
}

/// Convention 4: a literal `functools` marker followed by a JSON array of
/// `{name, arguments}` objects; one or more calls per block.
fn try_bracketed_list(text: &str) -> Detection {
    let Some(marker) = text.find(FUNCTOOLS_MARKER) else {
        return Detection::NoTrigger;
    };
    let array_start = marker + FUNCTOOLS_MARKER.len() - 1;
    let Some(array_end) = balanced_span_end(text, array_start, '[', ']') else {
        return Detection::Malformed;
    };
    let Ok(Value::Array(entries)) = serde_json::from_str::<Value>(&text[array_start..array_end])
    else {
        return Detection::Malformed;
    };
    let Some(calls) = calls_from_entries(&entries) else {
        return Detection::Malformed;
    };
    if calls.is_empty() {
        return Detection::Malformed;
    }
    Detection::Parsed {
        cleaned: join_prose(&text[..marker], &text[array_end..]),
        calls,
    }
}

/// Shared by the JSON-carrying conventions: each entry needs a `name`;
/// `arguments` (any JSON value, usually an object) is re-serialized compact.
fn calls_from_entries(entries: &[Value]) -> Option<Vec<ToolCall>> {
    let mut calls = Vec::with_capacity(entries.len());
    for entry in entries {
        let name = entry.get("name").and_then(Value::as_str)?;
        let arguments = entry
            .get("arguments")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        let arguments = serde_json::to_string(&arguments).ok()?;
        calls.push(new_tool_call(name, arguments));
    }
    Some(calls)
}

/// End index (exclusive) of the balanced bracket span opening at `start`,
/// tracking JSON string and escape state so braces inside strings don't
/// count.
fn balanced_span_end(text: &str, start: usize, open: char, close: char) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        if c == '"' {
            in_string = true;
        } else if c == open {
            depth += 1;
        } else if c == close {
            depth = depth.checked_sub(1)?;
            if depth == 0 {
                return Some(start + offset + c.len_utf8());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arguments_json(call: &ToolCall) -> Value {
        serde_json::from_str(&call.function.arguments).expect("arguments are valid JSON")
    }

    #[test]
    fn inline_json_convention() {
        let output = r#"Weather: {"tool_calls":[{"name":"get_weather","arguments":{"location":"NY","date":"2023-08-15"}}]}"#;
        let (cleaned, calls) = extract_tool_calls(output);

        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "get_weather");
        assert_eq!(
            arguments_json(&calls[0]),
            serde_json::json!({"location": "NY", "date": "2023-08-15"})
        );
        assert!(cleaned.contains("Weather:"));
        assert!(!cleaned.contains('{'));
        assert!(!cleaned.contains('}'));
    }

    #[test]
    fn legacy_tag_convention() {
        let output = "Let me check that for you.\n<function_calls>\n<function=get_stock_price>{\"symbol\": \"AAPL\"}</function>\n</function_calls>\n";
        let (cleaned, calls) = extract_tool_calls(output);

        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "get_stock_price");
        assert_eq!(arguments_json(&calls[0]), serde_json::json!({"symbol": "AAPL"}));
        assert!(cleaned.contains("Let me check that for you."));
        assert!(!cleaned.contains("<function_calls>"));
    }

    #[test]
    fn structured_tag_convention() {
        let output = "I'll get that information for you.\n<function_calls>\n<invoke>\n<tool_name>search_database</tool_name>\n<query>phones</query>\n<limit>5</limit>\n</invoke>\n</function_calls>\n";
        let (cleaned, calls) = extract_tool_calls(output);

        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "search_database");
        assert_eq!(
            arguments_json(&calls[0]),
            serde_json::json!({"query": "phones", "limit": "5"})
        );
        assert!(cleaned.contains("I'll get that information for you."));
        assert!(!cleaned.contains("<function_calls>"));
    }

    #[test]
    fn structured_tag_values_stay_strings() {
        let output = "<function_calls><invoke><tool_name>t</tool_name><limit>5</limit></invoke></function_calls>";
        let (_, calls) = extract_tool_calls(output);
        // "5" is not coerced to a number.
        assert_eq!(arguments_json(&calls[0]), serde_json::json!({"limit": "5"}));
    }

    #[test]
    fn structured_tag_multiple_invokes() {
        let output = "<function_calls>\
            <invoke><tool_name>first</tool_name><a>1</a></invoke>\
            <invoke><tool_name>second</tool_name><b>2</b></invoke>\
            </function_calls>";
        let (cleaned, calls) = extract_tool_calls(output);

        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].function.name, "first");
        assert_eq!(calls[1].function.name, "second");
        assert!(cleaned.is_empty());
    }

    #[test]
    fn bracketed_list_convention() {
        let output = r#"functools[{"name":"get_weather","arguments":{"location":"NY"}},{"name":"get_time","arguments":{"timezone":"EST"}}]"#;
        let (cleaned, calls) = extract_tool_calls(output);

        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].function.name, "get_weather");
        assert_eq!(arguments_json(&calls[0]), serde_json::json!({"location": "NY"}));
        assert_eq!(calls[1].function.name, "get_time");
        assert_eq!(arguments_json(&calls[1]), serde_json::json!({"timezone": "EST"}));
        assert!(!cleaned.contains("functools["));
    }

    #[test]
    fn bracketed_list_keeps_surrounding_prose() {
        let output = "Here are the results:\n    functools[{\"name\": \"get_current_weather\", \"arguments\": {\"location\": \"San Francisco, CA\", \"format\": \"fahrenheit\"}}]\n    ";
        let (cleaned, calls) = extract_tool_calls(output);

        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "get_current_weather");
        assert!(cleaned.contains("Here are the results:"));
        assert!(!cleaned.contains("functools["));
    }

    #[test]
    fn no_marker_returns_text_unchanged() {
        let output = "Just a plain answer with no calls.";
        let (cleaned, calls) = extract_tool_calls(output);
        assert!(calls.is_empty());
        assert_eq!(cleaned, output);
    }

    #[test]
    fn malformed_legacy_payload_degrades_to_prose() {
        let output = "Check:\n<function_calls><function=f>{not json}</function></function_calls>";
        let (cleaned, calls) = extract_tool_calls(output);
        assert!(calls.is_empty());
        assert_eq!(cleaned, output.trim());
    }

    #[test]
    fn malformed_functools_payload_degrades_to_prose() {
        let output = "functools[{\"name\": \"f\", \"arguments\": ";
        let (cleaned, calls) = extract_tool_calls(output);
        assert!(calls.is_empty());
        assert_eq!(cleaned, output.trim());
    }

    #[test]
    fn incidental_braces_in_prose_are_not_calls() {
        let output = "In Rust, a block is written { like this } and maps use {\"key\": 1}.";
        let (cleaned, calls) = extract_tool_calls(output);
        assert!(calls.is_empty());
        assert_eq!(cleaned, output);
    }

    #[test]
    fn inline_json_wins_over_later_conventions() {
        // Both triggers present; inline JSON has priority.
        let output = r#"{"tool_calls":[{"name":"a","arguments":{}}]} functools[{"name":"b","arguments":{}}]"#;
        let (_, calls) = extract_tool_calls(output);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "a");
    }

    #[test]
    fn each_call_gets_a_distinct_id() {
        let output = r#"functools[{"name":"a","arguments":{}},{"name":"b","arguments":{}}]"#;
        let (_, calls) = extract_tool_calls(output);
        assert_ne!(calls[0].id, calls[1].id);
        assert!(calls.iter().all(|c| c.id.starts_with("call_")));
        assert!(calls.iter().all(|c| c.call_type == "function"));
    }

    proptest! {
        #[test]
        fn never_panics_on_arbitrary_input(text in ".{0,400}") {
            let _ = extract_tool_calls(&text);
        }

        #[test]
        fn markerless_text_round_trips(text in "[a-zA-Z0-9 .,!?]{0,200}") {
            let (cleaned, calls) = extract_tool_calls(&text);
            prop_assert!(calls.is_empty());
            prop_assert_eq!(cleaned, text.trim().to_string());
        }
    }
}
