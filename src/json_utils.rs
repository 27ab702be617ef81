use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

// =============== JSON structure discovery in free-form model text ===============

/// Type of a JSON node found by the structure scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Object,
    Array,
}

/// Coordinates of a JSON structure within a larger text, including nested children.
#[derive(Debug, Clone)]
pub struct ObjCoords {
    pub start: usize,
    pub end: usize, // inclusive index of the closing bracket/brace
    pub kind: NodeType,
    pub children: Vec<ObjCoords>,
}

impl ObjCoords {
    pub fn new(start: usize, end: usize, kind: NodeType, children: Vec<ObjCoords>) -> Self {
        Self { start, end, kind, children }
    }

    /// The slice of `text` this node covers.
    pub fn slice<'a>(&self, text: &'a str) -> &'a str {
        &text[self.start..=self.end]
    }
}

#[derive(Debug)]
struct Frame {
    start: usize,
    kind: NodeType,
    children: Vec<ObjCoords>,
}

/// Find all JSON object/array structures in the given text. Coordinates are byte indices.
///
/// Brackets inside string literals are ignored. A closing bracket that does not
/// match the innermost open one discards that frame, so prose such as
/// "see [1} above" never yields a structure.
#[instrument(target = "study_companion::json", skip(text), fields(text_len = text.len()))]
pub fn find_json_structures(text: &str) -> Vec<ObjCoords> {
    let bytes = text.as_bytes();
    let mut results: Vec<ObjCoords> = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();

    let mut in_string = false;
    let mut escape = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escape {
                escape = false;
                continue;
            }
            match b {
                b'\\' => escape = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }

        let closing = match b {
            b'"' => {
                // Quotes only open a string inside a candidate structure; a stray
                // quote in prose must not swallow the JSON that follows it.
                if !stack.is_empty() {
                    in_string = true;
                }
                None
            }
            b'{' => {
                stack.push(Frame { start: i, kind: NodeType::Object, children: Vec::new() });
                None
            }
            b'[' => {
                stack.push(Frame { start: i, kind: NodeType::Array, children: Vec::new() });
                None
            }
            b'}' => Some(NodeType::Object),
            b']' => Some(NodeType::Array),
            _ => None,
        };

        if let Some(kind) = closing {
            if let Some(frame) = stack.pop() {
                if frame.kind == kind {
                    let node = ObjCoords::new(frame.start, i, kind, frame.children);
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(node);
                    } else {
                        results.push(node);
                    }
                }
            }
        }
    }

    debug!(target: "study_companion::json", count = results.len(), "found root structures");
    results
}

/// A deserialized item or an unknown structure (with coordinates) for upstream handling.
#[derive(Debug, Clone)]
pub enum ParsedOrUnknown<T> {
    Parsed(T),
    Unknown(ObjCoords),
}

/// Attempt to deserialize a node; if it fails, recursively try children.
fn descend_deserialize<T: DeserializeOwned>(text: &str, node: &ObjCoords, out: &mut Vec<ParsedOrUnknown<T>>) {
    if let Ok(parsed) = serde_json::from_str::<T>(node.slice(text)) {
        out.push(ParsedOrUnknown::Parsed(parsed));
        return;
    }
    let before_len = out.len();
    for child in &node.children {
        descend_deserialize::<T>(text, child, out);
    }
    if out.len() == before_len {
        out.push(ParsedOrUnknown::Unknown(node.clone()));
    }
}

/// Produce a flat list of parsed items or unknown structures from the given text.
pub fn deserialize_stream_map<T: DeserializeOwned>(text: &str) -> Vec<ParsedOrUnknown<T>> {
    let mut out = Vec::new();
    for node in &find_json_structures(text) {
        descend_deserialize::<T>(text, node, &mut out);
    }
    out
}

/// Extract all occurrences of `T` from a response string.
///
/// Strategy (in order):
/// - If the entire string parses as `Vec<T>`, return it.
/// - Otherwise, scan for JSON structures. At each node prefer `Vec<T>`, then `T`,
///   and descend into children only when neither matches.
#[instrument(target = "study_companion::json", skip(text), fields(text_len = text.len()))]
pub fn extract_all<T: DeserializeOwned>(text: &str) -> Vec<T> {
    if let Ok(v) = serde_json::from_str::<Vec<T>>(text) {
        return v;
    }

    fn collect_from_node<T: DeserializeOwned>(text: &str, node: &ObjCoords, out: &mut Vec<T>) {
        let s = node.slice(text);
        if let Ok(vs) = serde_json::from_str::<Vec<T>>(s) {
            out.extend(vs);
            return;
        }
        if let Ok(v) = serde_json::from_str::<T>(s) {
            out.push(v);
            return;
        }
        for child in &node.children {
            collect_from_node::<T>(text, child, out);
        }
    }

    let mut out: Vec<T> = Vec::new();
    for node in &find_json_structures(text) {
        collect_from_node::<T>(text, node, &mut out);
    }
    out
}

/// Remove a surrounding Markdown code fence (```json ... ```), if any.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json", "text", ...) on the opening line
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Card { front: String }

    #[test]
    fn structures_ignore_brackets_in_strings() {
        let text = r#"note {"front":"a } tricky [value"} end"#;
        let roots = find_json_structures(text);
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].slice(text), r#"{"front":"a } tricky [value"}"#);
    }

    #[test]
    fn stray_quote_in_prose_does_not_hide_json() {
        let text = r#"Here's the "deck: [{"front":"x"}]"#;
        let cards: Vec<Card> = extract_all(text);
        assert_eq!(cards, vec![Card { front: "x".into() }]);
    }

    #[test]
    fn mismatched_brackets_are_dropped() {
        assert!(find_json_structures("see [1} above").is_empty());
    }

    #[test]
    fn code_fences_are_stripped() {
        assert_eq!(strip_code_fences("```json\n[1, 2]\n```"), "[1, 2]");
        assert_eq!(strip_code_fences("  plain  "), "plain");
        assert_eq!(strip_code_fences("```\nhello"), "hello");
    }
}
