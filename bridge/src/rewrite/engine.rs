//! Serialization-aware URL search and replace

use serde::{Deserialize, Serialize};

use crate::rewrite::json::JsonCodec;
use crate::rewrite::node::{Codec, Node};
use crate::rewrite::php::PhpCodec;

/// What to replace with what
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplacementSpec {
    pub search_url: String,
    pub replace_url: String,
    #[serde(default)]
    pub case_insensitive: bool,
}

impl ReplacementSpec {
    pub fn new(search_url: impl Into<String>, replace_url: impl Into<String>) -> Self {
        Self {
            search_url: search_url.into(),
            replace_url: replace_url.into(),
            case_insensitive: false,
        }
    }

    pub fn case_insensitive(mut self, case_insensitive: bool) -> Self {
        self.case_insensitive = case_insensitive;
        self
    }
}

impl From<&ReplacementSpec> for Replacements {
    fn from(spec: &ReplacementSpec) -> Self {
        Replacements::new(
            [(spec.search_url.clone(), spec.replace_url.clone())],
            spec.case_insensitive,
        )
    }
}

/// Several search strings replaced in one left-to-right pass.
///
/// At each position the longest matching search wins and the scan resumes
/// after it, so replacement text is never searched again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacements {
    /// Longest search first
    pairs: Vec<(String, String)>,
    case_insensitive: bool,
}

impl Replacements {
    pub fn new<I>(pairs: I, case_insensitive: bool) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut pairs: Vec<(String, String)> = pairs
            .into_iter()
            .filter(|(search, _)| !search.is_empty())
            .map(|(search, replace)| {
                let search = if case_insensitive {
                    search.to_ascii_lowercase()
                } else {
                    search
                };
                (search, replace)
            })
            .collect();
        pairs.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        pairs.dedup_by(|a, b| a.0 == b.0);
        Self {
            pairs,
            case_insensitive,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Whether `haystack` contains any search string
    pub fn matches(&self, haystack: &str) -> bool {
        if self.case_insensitive {
            let lowered = haystack.to_ascii_lowercase();
            self.pairs.iter().any(|(search, _)| lowered.contains(search.as_str()))
        } else {
            self.pairs.iter().any(|(search, _)| haystack.contains(search.as_str()))
        }
    }

    /// Replace every occurrence in a plain string, counting replacements
    fn replace_all(&self, haystack: &str, count: &mut usize) -> String {
        // ASCII lowercasing keeps byte offsets, so positions map back
        let lowered;
        let scan = if self.case_insensitive {
            lowered = haystack.to_ascii_lowercase();
            lowered.as_str()
        } else {
            haystack
        };

        let mut out = String::with_capacity(haystack.len());
        let mut pos = 0;
        while pos < haystack.len() {
            let rest = &scan[pos..];
            let hit = self.pairs.iter().find(|(search, _)| rest.starts_with(search.as_str()));
            if let Some((search, replace)) = hit {
                out.push_str(replace);
                pos += search.len();
                *count += 1;
                continue;
            }
            match haystack[pos..].chars().next() {
                Some(c) => {
                    out.push(c);
                    pos += c.len_utf8();
                }
                None => break,
            }
        }
        out
    }
}

/// Result of rewriting one stored value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewritten {
    pub value: String,
    /// Leaf strings occurrences replaced
    pub replacements: usize,
}

impl Rewritten {
    pub fn changed(&self) -> bool {
        self.replacements > 0
    }
}

/// Recursive rewriter over plain and structured stored values.
///
/// Never fails: structured values are re-encoded with the codec that decoded
/// them, and values that look structured but do not decode are left as is.
pub struct UrlRewriteEngine {
    codecs: Vec<Box<dyn Codec>>,
}

impl Default for UrlRewriteEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl UrlRewriteEngine {
    /// Engine understanding PHP serialized values
    pub fn new() -> Self {
        Self {
            codecs: vec![Box::new(PhpCodec)],
        }
    }

    /// Engine that also decodes JSON objects and arrays
    pub fn with_json() -> Self {
        Self::new().with_codec(Box::new(JsonCodec))
    }

    /// Add a codec, tried after the existing ones
    pub fn with_codec(mut self, codec: Box<dyn Codec>) -> Self {
        self.codecs.push(codec);
        self
    }

    pub fn codec_names(&self) -> Vec<&'static str> {
        self.codecs.iter().map(|c| c.name()).collect()
    }

    /// Rewrite a stored value
    pub fn rewrite(&self, value: &str, spec: &ReplacementSpec) -> String {
        self.rewrite_counted(value, spec).value
    }

    /// Rewrite a stored value and report how many leaf occurrences changed
    pub fn rewrite_counted(&self, value: &str, spec: &ReplacementSpec) -> Rewritten {
        self.rewrite_all(value, &Replacements::from(spec))
    }

    /// Apply several replacements to a stored value in a single pass
    pub fn rewrite_all(&self, value: &str, set: &Replacements) -> Rewritten {
        let mut replacements = 0;
        let value = self.rewrite_str(value, set, &mut replacements);
        Rewritten {
            value,
            replacements,
        }
    }

    /// Rewrite leaf strings of an already decoded tree
    pub fn rewrite_node(&self, node: Node, set: &Replacements, count: &mut usize) -> Node {
        match node {
            Node::Str(s) => Node::Str(self.rewrite_str(&s, set, count)),
            Node::Seq(items) => Node::Seq(
                items
                    .into_iter()
                    .map(|item| self.rewrite_node(item, set, count))
                    .collect(),
            ),
            Node::Map(entries) => Node::Map(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, self.rewrite_node(value, set, count)))
                    .collect(),
            ),
            Node::Object { class, fields } => Node::Object {
                class,
                fields: fields
                    .into_iter()
                    .map(|(key, value)| {
                        if key.is_internal_property() {
                            (key, value)
                        } else {
                            let value = self.rewrite_node(value, set, count);
                            (key, value)
                        }
                    })
                    .collect(),
            },
            scalar => scalar,
        }
    }

    fn rewrite_str(&self, value: &str, set: &Replacements, count: &mut usize) -> String {
        if set.is_empty() || !set.matches(value) {
            return value.to_string();
        }

        for codec in &self.codecs {
            let Some(node) = codec.decode(value) else {
                continue;
            };
            let mut replaced = 0;
            let node = self.rewrite_node(node, set, &mut replaced);
            if replaced == 0 {
                // Match was in a key or an internal property
                return value.to_string();
            }
            *count += replaced;
            return codec.encode_like(&node, value);
        }

        if self.codecs.iter().any(|codec| codec.looks_encoded(value)) {
            // Corrupt structured value: a plain replace would break it further
            return value.to_string();
        }

        set.replace_all(value, count)
    }
}
