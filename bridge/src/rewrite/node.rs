//! Decoded form of a stored structured value

/// Map or object key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Int(i64),
    Str(String),
}

impl Key {
    /// Properties the rewriter must leave alone: numeric indexes, protected
    /// or private members (NUL-prefixed) and `__`-prefixed internals
    pub fn is_internal_property(&self) -> bool {
        match self {
            Key::Int(_) => true,
            Key::Str(name) => name.starts_with('\0') || name.starts_with("__"),
        }
    }
}

/// Tagged tree of a decoded value.
///
/// Floats keep their encoded text so re-encoding is byte exact.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Null,
    Bool(bool),
    Int(i64),
    Float(String),
    Str(String),
    /// Ordered list with implicit `0..n` keys
    Seq(Vec<Node>),
    /// Key/value map in stored order
    Map(Vec<(Key, Node)>),
    /// Class instance: type tag and named properties
    Object {
        class: String,
        fields: Vec<(Key, Node)>,
    },
}

/// A wire format for structured values
pub trait Codec: Send + Sync {
    fn name(&self) -> &'static str;

    /// Decode `raw`, `None` when it is not in this format
    fn decode(&self, raw: &str) -> Option<Node>;

    fn encode(&self, node: &Node) -> String;

    /// Encode `node` in the layout `original` was written in
    fn encode_like(&self, node: &Node, _original: &str) -> String {
        self.encode(node)
    }

    /// Whether `raw` has the outer shape of this format, decodable or not
    fn looks_encoded(&self, raw: &str) -> bool;
}
