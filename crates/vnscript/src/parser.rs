//! YAML → script tree + source map (§4.5).
//!
//! Grounded on `saphyr-parser`'s streaming event API (as used in the pack's
//! `serde-saphyr` reference: `Parser::new_from_str` yields
//! `(Event, Span)` pairs). Rather than build a generic `serde`-style
//! deserializer we drive the event stream directly into [`Node`]s, since the
//! target shape is fixed (§3) and two custom tags need first-class handling
//! that a generic deserializer would only get in the way of.

use crate::error::{ParserError, ParserErrorKind, SourcePos};
use crate::node::{Node, NodeId, NodePath, NodeValue, node_at_path};
use indexmap::IndexMap;
use saphyr_parser::{Event, Marker, Parser, ScalarStyle, ScanError, Span, Tag};

/// The result of parsing one YAML document against the fixed top-level
/// schema (§6): a mapping with an optional host-specific `config` and a
/// required `script` list of command nodes.
#[derive(Debug, Clone)]
pub struct ParserContext {
    script: Vec<Node>,
    config: Option<Node>,
    positions: IndexMap<NodeId, (usize, usize)>,
}

impl ParserContext {
    /// Parses `source` and validates it against the top-level document
    /// schema. On success, the `script` node list is ready to hand to
    /// [`crate::script::Script::new`]; on any syntax, schema, or tag
    /// failure, returns a [`ParserError`] carrying a `(line, column)`.
    pub fn parse(source: &str) -> Result<Self, ParserError> {
        let mut builder = TreeBuilder::default();
        let parser = Parser::new_from_str(source);
        for item in parser {
            let (event, span) = item.map_err(scan_error)?;
            builder.feed(event, span)?;
        }
        let root = builder.root.ok_or_else(|| ParserError {
            kind: ParserErrorKind::Syntax("empty YAML document".into()),
            pos: SourcePos { line: 1, column: 1 },
        })?;

        let Some(map) = root.as_map() else {
            return Err(schema_err(&builder.positions, root.id, "document root must be a mapping"));
        };
        let script = match map.get("script") {
            Some(node) => node
                .as_list()
                .ok_or_else(|| schema_err(&builder.positions, node.id, "'script' must be a list"))?
                .to_vec(),
            None => return Err(schema_err(&builder.positions, root.id, "missing required 'script' key")),
        };
        let config = map.get("config").cloned();

        Ok(Self { script, config, positions: builder.positions })
    }

    #[must_use]
    pub fn script(&self) -> &[Node] {
        &self.script
    }

    #[must_use]
    pub fn config(&self) -> Option<&Node> {
        self.config.as_ref()
    }

    /// Resolves a node path to its source coordinates, for pairing with a
    /// [`crate::error::ScriptError`]'s path (§4.5, §4.6).
    #[must_use]
    pub fn trace(&self, path: &NodePath) -> Option<(usize, usize)> {
        let node = node_at_path(&self.script, path)?;
        self.positions.get(&node.id).copied()
    }
}

fn scan_error(err: ScanError) -> ParserError {
    let marker = err.marker();
    ParserError {
        kind: ParserErrorKind::Syntax(err.info().to_owned()),
        pos: pos_from_marker(&marker),
    }
}

fn pos_from_marker(marker: &Marker) -> SourcePos {
    SourcePos { line: marker.line(), column: marker.col() + 1 }
}

fn schema_err(positions: &IndexMap<NodeId, (usize, usize)>, id: NodeId, msg: &str) -> ParserError {
    let (line, column) = positions.get(&id).copied().unwrap_or((1, 1));
    ParserError { kind: ParserErrorKind::Schema(msg.to_owned()), pos: SourcePos { line, column } }
}

/// One partially-built container, tracked while its `Start`/`End` events are
/// between us in the stream.
enum Frame {
    Seq { id: NodeId, items: Vec<Node> },
    Map { id: NodeId, entries: IndexMap<String, Node>, pending_key: Option<String> },
}

/// Drives a sequence of YAML events into a [`Node`] tree, assigning every
/// node (container or scalar) a fresh [`NodeId`] and recording its source
/// position as it's opened.
#[derive(Default)]
struct TreeBuilder {
    stack: Vec<Frame>,
    root: Option<Node>,
    positions: IndexMap<NodeId, (usize, usize)>,
    next_id: u32,
    documents_seen: u32,
}

impl TreeBuilder {
    fn alloc(&mut self, span: &Span) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        let pos = pos_from_marker(&span.start);
        self.positions.insert(id, (pos.line, pos.column));
        id
    }

    fn feed(&mut self, event: Event<'_>, span: Span) -> Result<(), ParserError> {
        match event {
            Event::StreamStart | Event::StreamEnd | Event::Nothing => Ok(()),
            Event::DocumentStart(_) => {
                self.documents_seen += 1;
                if self.documents_seen > 1 {
                    return Err(ParserError {
                        kind: ParserErrorKind::Schema("only a single YAML document is supported".into()),
                        pos: pos_from_marker(&span.start),
                    });
                }
                Ok(())
            }
            Event::DocumentEnd => Ok(()),
            Event::Alias(_) => Err(ParserError {
                kind: ParserErrorKind::Syntax("YAML anchors/aliases are not supported".into()),
                pos: pos_from_marker(&span.start),
            }),
            Event::Scalar(value, style, _anchor, tag) => {
                if self.awaiting_key() {
                    self.set_pending_key(value.into_owned(), &span)
                } else {
                    let id = self.alloc(&span);
                    let node_value = scalar_value(&value, style, tag.as_ref(), &span)?;
                    self.attach(Node::new(id, node_value))
                }
            }
            Event::SequenceStart(_anchor, _tag) => {
                if self.awaiting_key() {
                    return Err(ParserError {
                        kind: ParserErrorKind::Schema("mapping keys must be scalars".into()),
                        pos: pos_from_marker(&span.start),
                    });
                }
                let id = self.alloc(&span);
                self.stack.push(Frame::Seq { id, items: Vec::new() });
                Ok(())
            }
            Event::SequenceEnd => {
                let Some(Frame::Seq { id, items }) = self.stack.pop() else {
                    return Err(ParserError {
                        kind: ParserErrorKind::Syntax("unbalanced sequence end".into()),
                        pos: pos_from_marker(&span.start),
                    });
                };
                self.attach(Node::new(id, NodeValue::List(items)))
            }
            Event::MappingStart(_anchor, _tag) => {
                if self.awaiting_key() {
                    return Err(ParserError {
                        kind: ParserErrorKind::Schema("mapping keys must be scalars".into()),
                        pos: pos_from_marker(&span.start),
                    });
                }
                let id = self.alloc(&span);
                self.stack.push(Frame::Map { id, entries: IndexMap::new(), pending_key: None });
                Ok(())
            }
            Event::MappingEnd => {
                let Some(Frame::Map { id, entries, pending_key }) = self.stack.pop() else {
                    return Err(ParserError {
                        kind: ParserErrorKind::Syntax("unbalanced mapping end".into()),
                        pos: pos_from_marker(&span.start),
                    });
                };
                if pending_key.is_some() {
                    return Err(ParserError {
                        kind: ParserErrorKind::Syntax("mapping key with no value".into()),
                        pos: pos_from_marker(&span.start),
                    });
                }
                self.attach(Node::new(id, NodeValue::Map(entries)))
            }
        }
    }

    fn awaiting_key(&self) -> bool {
        matches!(self.stack.last(), Some(Frame::Map { pending_key: None, .. }))
    }

    fn set_pending_key(&mut self, key: String, span: &Span) -> Result<(), ParserError> {
        match self.stack.last_mut() {
            Some(Frame::Map { pending_key, .. }) => {
                *pending_key = Some(key);
                Ok(())
            }
            _ => Err(ParserError {
                kind: ParserErrorKind::Syntax("key outside of a mapping".into()),
                pos: pos_from_marker(&span.start),
            }),
        }
    }

    fn attach(&mut self, node: Node) -> Result<(), ParserError> {
        match self.stack.last_mut() {
            None => {
                self.root = Some(node);
                Ok(())
            }
            Some(Frame::Seq { items, .. }) => {
                items.push(node);
                Ok(())
            }
            Some(Frame::Map { entries, pending_key, .. }) => {
                let key = pending_key.take().expect("value attached while awaiting a key");
                entries.insert(key, node);
                Ok(())
            }
        }
    }
}

/// Infers a scalar's [`NodeValue`], honouring the two custom tags and
/// YAML's implicit typing for untagged plain scalars (§4.5, §3).
fn scalar_value(raw: &str, style: ScalarStyle, tag: Option<&Tag>, span: &Span) -> Result<NodeValue, ParserError> {
    if let Some(tag) = tag {
        return match (tag.handle.as_str(), tag.suffix.as_str()) {
            ("!", "exp") => Ok(NodeValue::ScriptExp(raw.to_owned())),
            ("!", "fmt") => Ok(NodeValue::ScriptFmt(raw.to_owned())),
            ("!!", "str") => Ok(NodeValue::Str(raw.to_owned())),
            ("!!", "int" | "float") => raw.parse::<f64>().map(NodeValue::Num).map_err(|_| ParserError {
                kind: ParserErrorKind::InvalidTag(format!("'{raw}' is not a valid number for !!{}", tag.suffix)),
                pos: pos_from_marker(&span.start),
            }),
            ("!!", "bool") => parse_bool(raw).map(NodeValue::Bool).ok_or_else(|| ParserError {
                kind: ParserErrorKind::InvalidTag(format!("'{raw}' is not a valid boolean for !!bool")),
                pos: pos_from_marker(&span.start),
            }),
            ("!!", "null") => Ok(NodeValue::Null),
            _ => Err(ParserError {
                kind: ParserErrorKind::InvalidTag(format!("unrecognised tag !{}{}", tag.handle, tag.suffix)),
                pos: pos_from_marker(&span.start),
            }),
        };
    }

    if style != ScalarStyle::Plain {
        return Ok(NodeValue::Str(raw.to_owned()));
    }

    if raw.is_empty() || raw == "~" || raw.eq_ignore_ascii_case("null") {
        return Ok(NodeValue::Null);
    }
    if let Some(b) = parse_bool(raw) {
        return Ok(NodeValue::Bool(b));
    }
    if let Ok(n) = raw.parse::<f64>() {
        return Ok(NodeValue::Num(n));
    }
    Ok(NodeValue::Str(raw.to_owned()))
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "true" | "True" | "TRUE" => Some(true),
        "false" | "False" | "FALSE" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::as_command;

    #[test]
    fn parses_plain_command_list() {
        let yaml = "script:\n  - print: A\n  - print: B\n";
        let ctx = ParserContext::parse(yaml).unwrap();
        assert_eq!(ctx.script().len(), 2);
        let (cmd, arg) = as_command(&ctx.script()[0]).unwrap();
        assert_eq!(cmd, "print");
        assert_eq!(arg.as_str(), Some("A"));
    }

    #[test]
    fn recognises_exp_and_fmt_tags() {
        let yaml = "script:\n  - if:\n      cond: !exp \"x > 0\"\n      then:\n        - print: !fmt \"hi {{x}}\"\n";
        let ctx = ParserContext::parse(yaml).unwrap();
        let (cmd, args) = as_command(&ctx.script()[0]).unwrap();
        assert_eq!(cmd, "if");
        let map = args.as_map().unwrap();
        assert!(map["cond"].is_expr());
        let then = map["then"].as_list().unwrap();
        let (_, print_arg) = as_command(&then[0]).unwrap();
        assert!(print_arg.is_fmt());
    }

    #[test]
    fn missing_script_key_is_a_schema_error() {
        let yaml = "config:\n  foo: 1\n";
        let err = ParserContext::parse(yaml).unwrap_err();
        assert!(matches!(err.kind, ParserErrorKind::Schema(_)));
    }

    #[test]
    fn trace_resolves_a_command_path() {
        let yaml = "script:\n  - label: start\n  - print: hi\n";
        let ctx = ParserContext::parse(yaml).unwrap();
        let pos = ctx.trace(&NodePath::root().push_index(1)).unwrap();
        assert_eq!(pos.0, 3);
    }
}
