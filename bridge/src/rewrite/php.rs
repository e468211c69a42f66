//! PHP `serialize()` format
//!
//! Supports `N`, `b`, `i`, `d`, `s`, `a` and `O`. References, custom
//! serialization (`C`) and enums are rejected, which leaves such values
//! untouched. String lengths are byte counts.

use crate::rewrite::node::{Codec, Key, Node};

/// Nesting beyond this is treated as malformed
const MAX_DEPTH: usize = 512;

#[derive(Debug, Clone, Copy, Default)]
pub struct PhpCodec;

impl Codec for PhpCodec {
    fn name(&self) -> &'static str {
        "php"
    }

    fn decode(&self, raw: &str) -> Option<Node> {
        let mut parser = Parser {
            input: raw.as_bytes(),
            pos: 0,
            depth: 0,
        };
        let node = parser.value()?;
        // Trailing bytes mean this was never a single serialized value
        if parser.pos != parser.input.len() {
            return None;
        }
        Some(node)
    }

    fn encode(&self, node: &Node) -> String {
        let mut out = String::new();
        write_node(&mut out, node);
        out
    }

    /// Same shape test as WordPress's `is_serialized`: a length-prefixed
    /// compound or string, or a complete scalar with nothing after it
    fn looks_encoded(&self, raw: &str) -> bool {
        let raw = raw.trim();
        if raw == "N;" {
            return true;
        }
        let Some((tag, rest)) = raw.split_once(':') else {
            return false;
        };
        match tag {
            "a" | "O" | "C" | "s" => {
                let Some((len, _)) = rest.split_once(':') else {
                    return false;
                };
                let closing = if tag == "s" { ';' } else { '}' };
                !len.is_empty()
                    && len.bytes().all(|b| b.is_ascii_digit())
                    && raw.ends_with(closing)
            }
            "i" | "d" | "b" => {
                let Some(number) = rest.strip_suffix(';') else {
                    return false;
                };
                let allowed = |b: u8| match tag {
                    "b" => matches!(b, b'0' | b'1'),
                    "i" => b.is_ascii_digit() || b == b'-',
                    _ => b.is_ascii_digit() || matches!(b, b'-' | b'+' | b'.' | b'E' | b'e'),
                };
                !number.is_empty() && number.bytes().all(allowed)
            }
            _ => false,
        }
    }
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn value(&mut self) -> Option<Node> {
        let tag = self.next()?;
        match tag {
            b'N' => {
                self.expect(b';')?;
                Some(Node::Null)
            }
            b'b' => {
                self.expect(b':')?;
                let value = match self.next()? {
                    b'0' => false,
                    b'1' => true,
                    _ => return None,
                };
                self.expect(b';')?;
                Some(Node::Bool(value))
            }
            b'i' => {
                self.expect(b':')?;
                Some(Node::Int(self.int_until(b';')?))
            }
            b'd' => {
                self.expect(b':')?;
                let raw = self.text_until(b';')?;
                if raw.is_empty() {
                    return None;
                }
                Some(Node::Float(raw.to_string()))
            }
            b's' => {
                self.expect(b':')?;
                Some(Node::Str(self.string_body()?))
            }
            b'a' => {
                self.expect(b':')?;
                let entries = self.entries()?;
                Some(into_seq_or_map(entries))
            }
            b'O' => {
                self.expect(b':')?;
                let class = self.string_body_with_end(b':')?;
                let fields = self.entries()?;
                Some(Node::Object { class, fields })
            }
            _ => None,
        }
    }

    /// `<count>:{<key><value>...}`
    fn entries(&mut self) -> Option<Vec<(Key, Node)>> {
        let count = usize::try_from(self.int_until(b':')?).ok()?;
        self.expect(b'{')?;

        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return None;
        }

        // Each entry needs at least 8 bytes, do not trust huge counts
        let mut entries = Vec::with_capacity(count.min(self.remaining() / 8));
        for _ in 0..count {
            let key = match self.next()? {
                b'i' => {
                    self.expect(b':')?;
                    Key::Int(self.int_until(b';')?)
                }
                b's' => {
                    self.expect(b':')?;
                    Key::Str(self.string_body()?)
                }
                _ => return None,
            };
            let value = self.value()?;
            entries.push((key, value));
        }

        self.depth -= 1;
        self.expect(b'}')?;
        Some(entries)
    }

    /// `<len>:"<bytes>";`
    fn string_body(&mut self) -> Option<String> {
        self.string_body_with_end(b';')
    }

    fn string_body_with_end(&mut self, end: u8) -> Option<String> {
        let len = usize::try_from(self.int_until(b':')?).ok()?;
        self.expect(b'"')?;
        let stop = self.pos.checked_add(len)?;
        let bytes = self.input.get(self.pos..stop)?;
        let value = std::str::from_utf8(bytes).ok()?.to_string();
        self.pos = stop;
        self.expect(b'"')?;
        self.expect(end)?;
        Some(value)
    }

    fn int_until(&mut self, end: u8) -> Option<i64> {
        self.text_until(end)?.parse().ok()
    }

    fn text_until(&mut self, end: u8) -> Option<&'a str> {
        let rest = self.input.get(self.pos..)?;
        let offset = rest.iter().position(|b| *b == end)?;
        let text = std::str::from_utf8(&rest[..offset]).ok()?;
        self.pos += offset + 1;
        Some(text)
    }

    fn next(&mut self) -> Option<u8> {
        let byte = *self.input.get(self.pos)?;
        self.pos += 1;
        Some(byte)
    }

    fn expect(&mut self, byte: u8) -> Option<()> {
        (self.next()? == byte).then_some(())
    }

    fn remaining(&self) -> usize {
        self.input.len().saturating_sub(self.pos)
    }
}

/// Arrays keyed exactly `0..n` in order are sequences
fn into_seq_or_map(entries: Vec<(Key, Node)>) -> Node {
    let sequential = entries
        .iter()
        .enumerate()
        .all(|(idx, (key, _))| matches!(key, Key::Int(i) if usize::try_from(*i).ok() == Some(idx)));

    if sequential {
        Node::Seq(entries.into_iter().map(|(_, value)| value).collect())
    } else {
        Node::Map(entries)
    }
}

fn write_node(out: &mut String, node: &Node) {
    match node {
        Node::Null => out.push_str("N;"),
        Node::Bool(value) => {
            out.push_str(if *value { "b:1;" } else { "b:0;" });
        }
        Node::Int(value) => {
            out.push_str(&format!("i:{};", value));
        }
        Node::Float(raw) => {
            out.push_str(&format!("d:{};", raw));
        }
        Node::Str(value) => write_str(out, value),
        Node::Seq(items) => {
            out.push_str(&format!("a:{}:{{", items.len()));
            for (idx, item) in items.iter().enumerate() {
                out.push_str(&format!("i:{};", idx));
                write_node(out, item);
            }
            out.push('}');
        }
        Node::Map(entries) => {
            out.push_str(&format!("a:{}:{{", entries.len()));
            write_entries(out, entries);
            out.push('}');
        }
        Node::Object { class, fields } => {
            out.push_str(&format!(
                "O:{}:\"{}\":{}:{{",
                class.len(),
                class,
                fields.len()
            ));
            write_entries(out, fields);
            out.push('}');
        }
    }
}

fn write_entries(out: &mut String, entries: &[(Key, Node)]) {
    for (key, value) in entries {
        match key {
            Key::Int(idx) => out.push_str(&format!("i:{};", idx)),
            Key::Str(name) => write_str(out, name),
        }
        write_node(out, value);
    }
}

fn write_str(out: &mut String, value: &str) {
    out.push_str(&format!("s:{}:\"{}\";", value.len(), value));
}
