//! Structured rewrite tests

use vercelwp::rewrite::json::JsonCodec;
use vercelwp::rewrite::node::{Codec, Key, Node};
use vercelwp::rewrite::php::PhpCodec;
use vercelwp::rewrite::{ReplacementSpec, UrlRewriteEngine};

const OLD: &str = "https://old.example.com";
const NEW: &str = "https://www.new-example.org";

fn s(value: &str) -> Node {
    Node::Str(value.to_string())
}

fn key(name: &str) -> Key {
    Key::Str(name.to_string())
}

/// Widget-like settings mixing every node kind
fn sample(host: &str) -> Node {
    Node::Map(vec![
        (key("title"), s("Links")),
        (key("home"), s(&format!("{}/", host))),
        (
            key("items"),
            Node::Seq(vec![
                s(&format!("see {}/a and {}/b", host, host)),
                Node::Int(42),
                Node::Bool(true),
                Node::Null,
                Node::Float("1.5".to_string()),
            ]),
        ),
        (
            key("sparse"),
            Node::Map(vec![(Key::Int(7), s(&format!("{}/seven", host)))]),
        ),
        (
            key("button"),
            Node::Object {
                class: "Button".to_string(),
                fields: vec![
                    (key("href"), s(&format!("{}/buy", host))),
                    (key("label"), s("Buy")),
                    // Cached internals keep the original host
                    (key("\0*\0cache"), s(&format!("{}/buy", OLD))),
                ],
            },
        ),
    ])
}

fn with_cache_untouched(mut node: Node) -> Node {
    if let Node::Map(entries) = &mut node {
        for (_, value) in entries.iter_mut() {
            if let Node::Object { fields, .. } = value {
                for (name, field) in fields.iter_mut() {
                    if name.is_internal_property() {
                        *field = s(&format!("{}/buy", OLD));
                    }
                }
            }
        }
    }
    node
}

#[test]
fn test_php_round_trip_replaces_leaf_strings_only() {
    let codec = PhpCodec;
    let engine = UrlRewriteEngine::new();
    let spec = ReplacementSpec::new(OLD, NEW);

    let encoded = codec.encode(&sample(OLD));
    let rewritten = engine.rewrite_counted(&encoded, &spec);

    assert_eq!(rewritten.replacements, 5);
    let decoded = codec.decode(&rewritten.value).unwrap();
    assert_eq!(decoded, with_cache_untouched(sample(NEW)));
}

#[test]
fn test_json_round_trip() {
    let codec = JsonCodec;
    let engine = UrlRewriteEngine::with_json();
    let spec = ReplacementSpec::new(OLD, NEW);

    let value = |host: &str| {
        Node::Map(vec![
            (key("url"), s(&format!("{}/x", host))),
            (
                key("gallery"),
                Node::Seq(vec![s(&format!("{}/1.jpg", host)), Node::Int(3)]),
            ),
        ])
    };

    let rewritten = engine.rewrite(&codec.encode(&value(OLD)), &spec);
    assert_eq!(codec.decode(&rewritten).unwrap(), value(NEW));
}

#[test]
fn test_serialized_value_nested_in_serialized_string() {
    let codec = PhpCodec;
    let engine = UrlRewriteEngine::new();
    let spec = ReplacementSpec::new(OLD, NEW);

    let inner = |host: &str| codec.encode(&Node::Seq(vec![s(&format!("{}/in", host))]));
    let outer = |host: &str| codec.encode(&Node::Map(vec![(key("blob"), s(&inner(host)))]));

    assert_eq!(engine.rewrite(&outer(OLD), &spec), outer(NEW));
}

#[test]
fn test_no_match_returns_input_unchanged() {
    let engine = UrlRewriteEngine::with_json();
    let spec = ReplacementSpec::new("https://absent.example.net", NEW);

    // Valid but not canonically spaced: re-encoding would change the bytes
    let json = "{ \"url\" : \"https://old.example.com/x\" }";
    assert_eq!(engine.rewrite(json, &spec), json);

    let php = PhpCodec.encode(&sample(OLD));
    let out = engine.rewrite_counted(&php, &spec);
    assert_eq!(out.value, php);
    assert!(!out.changed());

    assert_eq!(engine.rewrite("plain text", &spec), "plain text");
    assert_eq!(engine.rewrite("", &spec), "");
}

#[test]
fn test_match_only_in_keys_returns_input_unchanged() {
    let engine = UrlRewriteEngine::with_json();
    let spec = ReplacementSpec::new(OLD, NEW);

    let json = "{ \"https://old.example.com\" : 1 }";
    assert_eq!(engine.rewrite(json, &spec), json);
}
