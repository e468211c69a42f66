//! JSON-encoded structured values
//!
//! Only objects and arrays are treated as structured; bare JSON scalars are
//! ordinary strings.
//!
//! A rewritten value keeps the layout it was stored in: surrounding
//! whitespace, pretty-print indentation, `\/` escaping and `\uXXXX` escaping
//! of non-ASCII text. Key spacing follows the usual `"key": value` form, so
//! hand-aligned JSON is normalized.

use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use serde_json::{Map, Number, Value};

use crate::rewrite::node::{Codec, Key, Node};

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn decode(&self, raw: &str) -> Option<Node> {
        let trimmed = raw.trim_start();
        if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
            return None;
        }
        let value: Value = serde_json::from_str(raw).ok()?;
        Some(from_value(value))
    }

    fn encode(&self, node: &Node) -> String {
        to_value(node).to_string()
    }

    fn encode_like(&self, node: &Node, original: &str) -> String {
        let value = to_value(node);
        let body = original.trim();
        let mut out = match indent_of(body) {
            Some(indent) => pretty(&value, indent),
            None => value.to_string(),
        };
        if body.contains("\\/") {
            out = out.replace('/', "\\/");
        }
        if original.is_ascii() && !out.is_ascii() {
            out = escape_non_ascii(&out);
        }

        let lead = &original[..original.len() - original.trim_start().len()];
        let trail = &original[original.trim_end().len()..];
        format!("{}{}{}", lead, out, trail)
    }

    fn looks_encoded(&self, raw: &str) -> bool {
        let raw = raw.trim();
        (raw.starts_with('{') && raw.ends_with('}')) || (raw.starts_with('[') && raw.ends_with(']'))
    }
}

/// Indentation of the first nested line, `None` for single-line JSON
fn indent_of(body: &str) -> Option<&str> {
    let line = body.lines().skip(1).find(|l| !l.trim().is_empty())?;
    let indent = &line[..line.len() - line.trim_start().len()];
    (!indent.is_empty()).then_some(indent)
}

fn pretty(value: &Value, indent: &str) -> String {
    let mut buf = Vec::new();
    let formatter = PrettyFormatter::with_indent(indent.as_bytes());
    let mut ser = Serializer::with_formatter(&mut buf, formatter);
    if value.serialize(&mut ser).is_err() {
        return value.to_string();
    }
    String::from_utf8(buf).unwrap_or_else(|_| value.to_string())
}

/// Non-ASCII only ever appears inside string literals of serialized JSON
fn escape_non_ascii(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        if c.is_ascii() {
            out.push(c);
            continue;
        }
        let mut units = [0u16; 2];
        for unit in c.encode_utf16(&mut units) {
            out.push_str(&format!("\\u{:04x}", unit));
        }
    }
    out
}

fn from_value(value: Value) -> Node {
    match value {
        Value::Null => Node::Null,
        Value::Bool(b) => Node::Bool(b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Node::Int(i),
            None => Node::Float(n.to_string()),
        },
        Value::String(s) => Node::Str(s),
        Value::Array(items) => Node::Seq(items.into_iter().map(from_value).collect()),
        Value::Object(map) => Node::Map(
            map.into_iter()
                .map(|(k, v)| (Key::Str(k), from_value(v)))
                .collect(),
        ),
    }
}

fn to_value(node: &Node) -> Value {
    match node {
        Node::Null => Value::Null,
        Node::Bool(b) => Value::Bool(*b),
        Node::Int(i) => Value::Number((*i).into()),
        Node::Float(raw) => serde_json::from_str::<Number>(raw)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Node::Str(s) => Value::String(s.clone()),
        Node::Seq(items) => Value::Array(items.iter().map(to_value).collect()),
        Node::Map(entries) | Node::Object { fields: entries, .. } => {
            let mut map = Map::new();
            for (key, value) in entries {
                let key = match key {
                    Key::Int(i) => i.to_string(),
                    Key::Str(s) => s.clone(),
                };
                map.insert(key, to_value(value));
            }
            Value::Object(map)
        }
    }
}
