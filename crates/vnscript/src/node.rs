//! The script tree: a dynamically typed node plus the path/identity
//! machinery that lets the interpreter blame a specific command for a
//! failure and the parser map that command back to source coordinates.

use indexmap::IndexMap;
use std::fmt;

/// Arena index assigned to every node as it is parsed.
///
/// Positions are looked up by this id rather than by value so that two
/// structurally identical nodes (e.g. two `{print: "A"}` commands) still
/// resolve to their own, distinct source coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// One segment of a path from the script root down to a specific node.
///
/// A path is how the interpreter blames a command: `source[2]["then"][0]`
/// becomes `[Index(2), Key("then"), Index(0)]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(k) => write!(f, ".{k}"),
            Self::Index(i) => write!(f, "[{i}]"),
        }
    }
}

/// A path from the script root to a node, used both for error reporting and
/// for locating a saved frame's code after a patch (§4.6 `save`/`load`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct NodePath(pub Vec<PathSegment>);

impl NodePath {
    #[must_use]
    pub fn root() -> Self {
        Self(Vec::new())
    }

    #[must_use]
    pub fn push_key(&self, key: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Key(key.into()));
        Self(segments)
    }

    #[must_use]
    pub fn push_index(&self, index: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Index(index));
        Self(segments)
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source")?;
        for segment in &self.0 {
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

/// The shape of a node's value (§3 Node).
///
/// This is the in-memory representation only; JSON round-tripping (the save
/// format's `__class`-tagged encoding of [`NodeValue::ScriptExp`] and
/// [`NodeValue::ScriptFmt`]) lives in [`crate::serializer`], since plain
/// `serde` tagging cannot express "primitives pass through bare, only two
/// variants get wrapped".
#[derive(Debug, Clone, PartialEq)]
pub enum NodeValue {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    List(Vec<Node>),
    Map(IndexMap<String, Node>),
    /// `!exp <scalar>` — a tagged expression, evaluated in place before a
    /// command's arguments are validated.
    ScriptExp(String),
    /// `!fmt <scalar>` — a tagged template, rendered in place before a
    /// command's arguments are validated.
    ScriptFmt(String),
}

/// One node in a parsed script tree (§3 Node).
///
/// Carries an arena [`NodeId`] so the parser's source map and the script's
/// error-reporting path logic can both refer to "this exact node" rather
/// than "a node that looks like this".
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub value: NodeValue,
}

impl NodeId {
    /// Placeholder id for nodes built outside the parser (tests, values
    /// reconstructed from a save file). Never used for `trace` lookups.
    pub const DUMMY: Self = Self(u32::MAX);
}

impl Node {
    #[must_use]
    pub fn new(id: NodeId, value: NodeValue) -> Self {
        Self { id, value }
    }

    /// Shorthand for a detached null, used by commands that emit no payload.
    #[must_use]
    pub fn null() -> Self {
        Self::detached(NodeValue::Null)
    }

    /// Builds a node with no meaningful source position, for tests and for
    /// values reconstructed from a save file.
    #[must_use]
    pub fn detached(value: NodeValue) -> Self {
        Self { id: NodeId::DUMMY, value }
    }

    #[must_use]
    pub fn is_expr(&self) -> bool {
        matches!(self.value, NodeValue::ScriptExp(_))
    }

    #[must_use]
    pub fn is_fmt(&self) -> bool {
        matches!(self.value, NodeValue::ScriptFmt(_))
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            NodeValue::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&IndexMap<String, Node>> {
        match &self.value {
            NodeValue::Map(m) => Some(m),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[Node]> {
        match &self.value {
            NodeValue::List(l) => Some(l),
            _ => None,
        }
    }

    #[must_use]
    pub fn truthy(&self) -> bool {
        match &self.value {
            NodeValue::Null => false,
            NodeValue::Bool(b) => *b,
            NodeValue::Num(n) => *n != 0.0,
            NodeValue::Str(s) => !s.is_empty(),
            NodeValue::List(l) => !l.is_empty(),
            NodeValue::Map(m) => !m.is_empty(),
            NodeValue::ScriptExp(_) | NodeValue::ScriptFmt(_) => true,
        }
    }
}

/// A single top-level command: exactly one key naming the operation, whose
/// value carries the arguments (§3 Script source).
#[must_use]
pub fn as_command(node: &Node) -> Option<(&str, &Node)> {
    let map = node.as_map()?;
    if map.len() != 1 {
        return None;
    }
    map.iter().next().map(|(k, v)| (k.as_str(), v))
}

/// Resolves a path to the node it addresses within `source` (the script
/// root, a plain node list rather than a node itself). The first segment
/// always indexes into `source`; later segments descend through maps and
/// lists. Used by the parser's `trace` and, via [`list_at_path`], by the
/// stack patcher's save/load frame lookup (§4.6).
#[must_use]
pub fn node_at_path<'a>(source: &'a [Node], path: &NodePath) -> Option<&'a Node> {
    let mut segments = path.0.iter();
    let PathSegment::Index(first) = segments.next()? else { return None };
    let mut node = source.get(*first)?;
    for segment in segments {
        node = match segment {
            PathSegment::Key(key) => node.as_map()?.get(key)?,
            PathSegment::Index(index) => node.as_list()?.get(*index)?,
        };
    }
    Some(node)
}

/// Resolves a path to the node *list* it addresses — the empty path denotes
/// `source` itself; a non-empty path denotes the list value of the node it
/// points to (a `then`/`else`/menu-choice block).
#[must_use]
pub fn list_at_path<'a>(source: &'a [Node], path: &NodePath) -> Option<&'a [Node]> {
    if path.0.is_empty() {
        return Some(source);
    }
    node_at_path(source, path)?.as_list()
}

/// Encodes a [`NodePath`] as a plain [`Node`] list (segments as strings or
/// numbers), the representation used both inside a save envelope's frame
/// entries and in a [`crate::scene::Scene`] menu entry's `path` field.
#[must_use]
pub fn path_to_node(path: &NodePath) -> Node {
    let items = path
        .0
        .iter()
        .map(|segment| match segment {
            PathSegment::Key(key) => Node::detached(NodeValue::Str(key.clone())),
            PathSegment::Index(index) => Node::detached(NodeValue::Num(*index as f64)),
        })
        .collect();
    Node::detached(NodeValue::List(items))
}

/// Inverse of [`path_to_node`]; `None` if `node` isn't a list of strings/numbers.
#[must_use]
pub fn path_from_node(node: &Node) -> Option<NodePath> {
    let items = node.as_list()?;
    let mut segments = Vec::with_capacity(items.len());
    for item in items {
        segments.push(match &item.value {
            NodeValue::Str(key) => PathSegment::Key(key.clone()),
            NodeValue::Num(index) => PathSegment::Index(*index as usize),
            _ => return None,
        });
    }
    Some(NodePath(segments))
}
