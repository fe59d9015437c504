//! The generic command interpreter (§4.6): composes [`Scope`], [`Stack`],
//! and the JSON [`crate::serializer`] into something that can `step`,
//! `save`/`load`, and `patch` its own source without losing its place.

use crate::error::{ScriptError, ScriptErrorKind};
use crate::expr::{self, ExpressionError};
use crate::io::{LogSink, StdoutSink};
use crate::node::{Node, NodePath, NodeValue, as_command, list_at_path, path_from_node, path_to_node};
use crate::scope::Scope;
use crate::serializer::{self, UnknownClass};
use crate::stack::{Frame, Stack};
use indexmap::IndexMap;
use serde_json::Value;

/// One emitted event (§4.6 `emit`, §6 event stream).
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptEvent {
    pub kind: String,
    pub data: Node,
}

/// Handle returned by [`Script::subscribe`], used to remove that exact
/// listener later (Design Notes §9: "a generation counter or slab key").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Box<dyn FnMut(&ScriptEvent)>;

/// The generic, extensible command interpreter (§4.6).
///
/// Generic over `L: LogSink` the way the teacher's `Runner`/`ReplSession`
/// are generic over `impl PrintWriter` — the host decides what `print`
/// output means.
pub struct Script<L: LogSink = StdoutSink> {
    pub(crate) source: Vec<Node>,
    pub(crate) stack: Stack,
    pub(crate) scope: Scope,
    subscribers: IndexMap<u64, Subscriber>,
    next_subscriber_id: u64,
    pub(crate) log: L,
    /// When set, every emitted event is also mirrored into this scope key —
    /// the Scene dialect's reserved `event` key (§3). Plain `Script` leaves
    /// this unset.
    event_mirror_key: Option<&'static str>,
}

impl<L: LogSink + Default> Script<L> {
    /// Builds a new script over `source`, pushing it as the root frame.
    #[must_use]
    pub fn new(source: Vec<Node>) -> Self {
        Self::with_log(source, L::default())
    }
}

impl<L: LogSink> Script<L> {
    #[must_use]
    pub fn with_log(source: Vec<Node>, log: L) -> Self {
        let mut stack = Stack::new();
        if !source.is_empty() {
            stack.push(source.clone(), NodePath::root());
        }
        Self {
            source,
            stack,
            scope: Scope::new(),
            subscribers: IndexMap::new(),
            next_subscriber_id: 0,
            log,
            event_mirror_key: None,
        }
    }

    pub(crate) fn enable_event_mirror(&mut self, key: &'static str) {
        self.event_mirror_key = Some(key);
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.stack.is_empty()
    }

    #[must_use]
    pub fn get_var(&self, name: &str) -> Node {
        self.scope.get(name)
    }

    pub fn set_var(&mut self, name: impl Into<String>, value: Node) {
        self.scope.set(name, value);
    }

    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// The log sink `print` writes to, exposed so embedders (and tests) can
    /// inspect what's been logged without intercepting it via `subscribe`.
    #[must_use]
    pub fn log(&self) -> &L {
        &self.log
    }

    pub(crate) fn scope_mut(&mut self) -> &mut Scope {
        &mut self.scope
    }

    #[must_use]
    pub fn source(&self) -> &[Node] {
        &self.source
    }

    /// Calls every subscriber, in registration order, with `{kind, data}`
    /// (§4.6 `emit`). Synchronous: returns only after every listener has run.
    pub fn emit(&mut self, kind: impl Into<String>, data: Node) {
        let event = ScriptEvent { kind: kind.into(), data };
        if let Some(key) = self.event_mirror_key {
            let mirrored = Node::detached(NodeValue::Map(IndexMap::from([
                ("type".to_owned(), Node::detached(NodeValue::Str(event.kind.clone()))),
                ("data".to_owned(), event.data.clone()),
            ])));
            self.scope.set(key, mirrored);
        }
        for subscriber in self.subscribers.values_mut() {
            subscriber(&event);
        }
    }

    /// Registers `listener`; returns an id that removes this exact listener
    /// from [`Script::unsubscribe`].
    pub fn subscribe(&mut self, listener: impl FnMut(&ScriptEvent) + 'static) -> SubscriptionId {
        let id = self.next_subscriber_id;
        self.next_subscriber_id += 1;
        self.subscribers.insert(id, Box::new(listener));
        SubscriptionId(id)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subscribers.shift_remove(&id.0);
    }

    /// Finds the root-level `{label: L}` command and repositions the root
    /// frame's program counter to its index (§4.6).
    pub fn jump(&mut self, label: &str) -> Result<(), ScriptError> {
        self.jump_internal(label).map_err(|kind| ScriptError::new(kind, NodePath::root()))
    }

    pub(crate) fn jump_internal(&mut self, label: &str) -> Result<(), ScriptErrorKind> {
        let index = self
            .source
            .iter()
            .position(|node| matches!(as_command(node), Some((cmd, arg)) if cmd == "label" && arg.as_str() == Some(label)))
            .ok_or_else(|| ScriptErrorKind::UnknownLabel(label.to_owned()))?;
        let root = self.stack.ensure_root(self.source.clone());
        root.code = self.source.clone();
        root.pc = index;
        Ok(())
    }

    /// Pulls one instruction and dispatches it. No-op if the script is
    /// already done. On success, emits `{kind: "step"}`; on failure,
    /// re-raises as a [`ScriptError`] carrying the offending command's node
    /// path (§4.6, §7).
    pub fn step(&mut self) -> Result<(), ScriptError> {
        let Some(pulled) = self.stack.pull() else {
            return Ok(());
        };
        let path = pulled.frame_path.push_index(pulled.index);
        self.exec(pulled.value, path)?;
        self.emit("step", Node::null());
        Ok(())
    }

    /// Dispatches one pulled node as a command, at `path` (§4.6 `exec`).
    /// Exposed to [`crate::scene::Scene`] as the generic fallback for
    /// commands it doesn't itself recognise.
    pub(crate) fn exec(&mut self, node: Node, path: NodePath) -> Result<(), ScriptError> {
        let Some((cmd, args)) = as_command(&node) else {
            return Err(ScriptError::new(
                ScriptErrorKind::InvalidArgs("a command must be a single-key mapping".into()),
                path,
            ));
        };
        self.exec_generic(cmd, args, path)
    }

    pub(crate) fn exec_generic(&mut self, cmd: &str, args: &Node, path: NodePath) -> Result<(), ScriptError> {
        match cmd {
            "if" => self.exec_if(args, &path),
            "label" => Ok(()),
            "jump" => {
                let label = self.require_str(args, &path, "jump")?;
                self.jump_internal(&label).map_err(|kind| ScriptError::new(kind, path))
            }
            "eval" => self.exec_eval(args, &path),
            "print" => {
                let text = self.render_scalar_as_string(args, &path)?;
                self.log.log(&text);
                Ok(())
            }
            "throw" => {
                let text = self.render_scalar_as_string(args, &path)?;
                Err(ScriptError::new(ScriptErrorKind::Thrown(text), path))
            }
            "set" => self.exec_set(args, &path),
            "emit" => self.exec_emit(args, &path),
            other => Err(ScriptError::new(ScriptErrorKind::UnknownCommand(other.to_owned()), path)),
        }
    }

    fn exec_if(&mut self, args: &Node, path: &NodePath) -> Result<(), ScriptError> {
        let map = args
            .as_map()
            .ok_or_else(|| ScriptError::new(ScriptErrorKind::InvalidArgs("'if' requires a mapping".into()), path.clone()))?;
        let cond_node = map
            .get("cond")
            .ok_or_else(|| ScriptError::new(ScriptErrorKind::InvalidArgs("'if' requires 'cond'".into()), path.clone()))?;
        let cond = self.resolve_scalar(cond_node).map_err(|e| self.expr_err(e, path))?;
        // §4.6: if truthy and `then` present, push it; *otherwise* if `else`
        // present, push it — a truthy `cond` with no `then` still falls
        // through to `else` rather than being swallowed.
        let branch = if cond.truthy() && map.get("then").is_some() { map.get("then").map(|b| ("then", b)) } else { map.get("else").map(|b| ("else", b)) };
        if let Some((key, block)) = branch {
            let code = block
                .as_list()
                .ok_or_else(|| ScriptError::new(ScriptErrorKind::InvalidArgs("'then'/'else' must be a list".into()), path.clone()))?;
            self.stack.push(code.to_vec(), path.push_key("if").push_key(key));
        }
        Ok(())
    }

    fn exec_eval(&mut self, args: &Node, path: &NodePath) -> Result<(), ScriptError> {
        let src = self.require_str(args, path, "eval")?;
        for stmt in split_statements(&src) {
            let stmt = stmt.trim();
            if stmt.is_empty() {
                continue;
            }
            let (name, expr_src) = split_assignment(stmt)
                .ok_or_else(|| ScriptError::new(ScriptErrorKind::InvalidArgs(format!("'eval' statement is not an assignment: {stmt}")), path.clone()))?;
            let value = expr::evaluate(expr_src, &self.scope).map_err(|e| self.expr_err(e, path))?;
            self.scope.set(name, value);
        }
        Ok(())
    }

    fn exec_set(&mut self, args: &Node, path: &NodePath) -> Result<(), ScriptError> {
        let map = args
            .as_map()
            .ok_or_else(|| ScriptError::new(ScriptErrorKind::InvalidArgs("'set' requires a mapping".into()), path.clone()))?;
        let name = map
            .get("name")
            .and_then(Node::as_str)
            .ok_or_else(|| ScriptError::new(ScriptErrorKind::InvalidArgs("'set' requires a string 'name'".into()), path.clone()))?
            .to_owned();
        let value_node = map
            .get("value")
            .ok_or_else(|| ScriptError::new(ScriptErrorKind::InvalidArgs("'set' requires 'value'".into()), path.clone()))?;
        let value = self.deep_resolve(value_node).map_err(|e| self.expr_err(e, path))?;
        self.scope.set(name, value);
        Ok(())
    }

    fn exec_emit(&mut self, args: &Node, path: &NodePath) -> Result<(), ScriptError> {
        let map = args
            .as_map()
            .ok_or_else(|| ScriptError::new(ScriptErrorKind::InvalidArgs("'emit' requires a mapping".into()), path.clone()))?;
        let kind = map
            .get("type")
            .and_then(Node::as_str)
            .ok_or_else(|| ScriptError::new(ScriptErrorKind::InvalidArgs("'emit' requires a string 'type'".into()), path.clone()))?
            .to_owned();
        let data = match map.get("data") {
            Some(node) => self.deep_resolve(node).map_err(|e| self.expr_err(e, path))?,
            None => Node::null(),
        };
        self.emit(kind, data);
        Ok(())
    }

    fn expr_err(&self, e: ExpressionError, path: &NodePath) -> ScriptError {
        ScriptError::new(ScriptErrorKind::Expression(e), path.clone())
    }

    fn require_str(&self, args: &Node, path: &NodePath, cmd: &str) -> Result<String, ScriptError> {
        let resolved = self.resolve_scalar(args).map_err(|e| self.expr_err(e, path))?;
        resolved
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| ScriptError::new(ScriptErrorKind::InvalidArgs(format!("'{cmd}' requires a string argument")), path.clone()))
    }

    /// Resolves `node` for a field that is data, not a nested command block:
    /// a bare `!exp`/`!fmt` scalar evaluates/renders in place. Does not
    /// recurse — callers that need recursion through arrays/objects use
    /// [`Script::deep_resolve`].
    fn resolve_scalar(&self, node: &Node) -> Result<Node, ExpressionError> {
        match &node.value {
            NodeValue::ScriptExp(src) => self.scope.render_expression(src),
            NodeValue::ScriptFmt(src) => self.scope.render_template(src).map(|s| Node::detached(NodeValue::Str(s))),
            _ => Ok(node.clone()),
        }
    }

    fn render_scalar_as_string(&self, node: &Node, path: &NodePath) -> Result<String, ScriptError> {
        let resolved = self.resolve_scalar(node).map_err(|e| self.expr_err(e, path))?;
        Ok(expr::display(&resolved))
    }

    /// Resolves `node` recursively through lists/maps, substituting every
    /// `!exp`/`!fmt` leaf (§4.6 "Expression/template resolution"). Used for
    /// command fields that carry plain data (`set.value`, `emit.data`,
    /// scene presentation args) — never for fields that hold nested command
    /// blocks (`if.then`/`if.else`, `menu`'s per-choice blocks), which must
    /// resolve their own tags lazily, at their own execution time.
    pub(crate) fn deep_resolve(&self, node: &Node) -> Result<Node, ExpressionError> {
        match &node.value {
            NodeValue::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.deep_resolve(item)?);
                }
                Ok(Node::detached(NodeValue::List(out)))
            }
            NodeValue::Map(map) => {
                let mut out = IndexMap::new();
                for (k, v) in map {
                    out.insert(k.clone(), self.deep_resolve(v)?);
                }
                Ok(Node::detached(NodeValue::Map(out)))
            }
            _ => self.resolve_scalar(node),
        }
    }

    pub(crate) fn push_block(&mut self, code: &[Node], path: NodePath) {
        self.stack.push(code.to_vec(), path);
    }

    /// Serializes `{scope, stack}` to a JSON save envelope (§6).
    #[must_use]
    pub fn save(&self) -> String {
        let scope_json: serde_json::Map<String, Value> =
            self.scope.dump().iter().map(|(k, v)| (k.clone(), serializer::node_to_json(v))).collect();
        let stack_json: Vec<Value> = self
            .stack
            .dump()
            .iter()
            .map(|frame| {
                serde_json::json!({
                    "path": serializer::node_to_json(&path_to_node(&frame.path)),
                    "code": Value::Array(frame.code.iter().map(serializer::node_to_json).collect()),
                    "programCounter": frame.pc,
                })
            })
            .collect();
        let envelope = serde_json::json!({
            "version": 1,
            "scope": Value::Object(scope_json),
            "stack": stack_json,
        });
        envelope.to_string()
    }

    /// Rebuilds scope and stack from a save envelope (§6). Transactional:
    /// on any structural or reference failure the current state is left
    /// untouched and `ScriptErrorKind::LoadFailed` is raised (§7). Frames
    /// whose `path` no longer resolves against the current `source` are
    /// silently dropped, matching the spec's patch-tolerant reload.
    pub fn load(&mut self, saved: &str) -> Result<(), ScriptError> {
        let envelope: Value = serde_json::from_str(saved).map_err(|_| load_failed())?;
        if envelope.get("version").and_then(Value::as_u64) != Some(1) {
            return Err(load_failed());
        }

        let scope_obj = envelope.get("scope").and_then(Value::as_object).ok_or_else(load_failed)?;
        let mut new_scope = IndexMap::new();
        for (k, v) in scope_obj {
            new_scope.insert(k.clone(), from_json(v)?);
        }

        let stack_arr = envelope.get("stack").and_then(Value::as_array).ok_or_else(load_failed)?;
        let mut new_stack = Stack::new();
        for frame_val in stack_arr {
            let path_node = from_json(frame_val.get("path").ok_or_else(load_failed)?)?;
            let path = path_from_node(&path_node).ok_or_else(load_failed)?;
            let code_arr = frame_val.get("code").and_then(Value::as_array).ok_or_else(load_failed)?;
            let pc = frame_val.get("programCounter").and_then(Value::as_u64).ok_or_else(load_failed)? as usize;
            let Some(current_code) = list_at_path(&self.source, &path) else {
                continue;
            };
            let mut saved_code = Vec::with_capacity(code_arr.len());
            for item in code_arr {
                saved_code.push(from_json(item)?);
            }
            let frame_index = new_stack.push_frame(Frame { code: saved_code, pc, path });
            new_stack.patch(frame_index, current_code.to_vec());
        }

        self.scope.clear();
        self.scope.load(new_scope);
        self.stack = new_stack;
        Ok(())
    }

    /// `save(); source = new_source; load()` (§4.6 `patch`).
    pub fn patch(&mut self, new_source: Vec<Node>) -> Result<(), ScriptError> {
        let saved = self.save();
        self.source = new_source;
        self.load(&saved)
    }
}

fn load_failed() -> ScriptError {
    ScriptError::new(ScriptErrorKind::LoadFailed, NodePath::root())
}

fn from_json(value: &Value) -> Result<Node, ScriptError> {
    serializer::node_from_json(value).map_err(|UnknownClass(_)| load_failed())
}

/// Splits an `eval` source into top-level statements on `;`, respecting
/// bracket/brace/paren nesting and quoted strings so a literal inside one
/// assignment's RHS can't be mistaken for a statement separator.
fn split_statements(src: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    let mut quote: Option<char> = None;
    let bytes = src.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if let Some(q) = quote {
            if c == '\\' {
                i += 1;
            } else if c == q {
                quote = None;
            }
        } else {
            match c {
                '"' | '\'' => quote = Some(c),
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => depth -= 1,
                ';' if depth == 0 => {
                    out.push(&src[start..i]);
                    start = i + 1;
                }
                _ => {}
            }
        }
        i += 1;
    }
    if start < src.len() {
        out.push(&src[start..]);
    }
    out
}

/// Splits a single `eval` statement of the form `this.NAME = EXPR` or bare
/// `NAME = EXPR` into `(NAME, EXPR)`, per the restricted assignment grammar
/// this port accepts (SPEC_FULL §"eval's this binding", Open Question 1).
fn split_assignment(stmt: &str) -> Option<(&str, &str)> {
    let bytes = stmt.as_bytes();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut i = 0usize;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if let Some(q) = quote {
            if c == '\\' {
                i += 1;
            } else if c == q {
                quote = None;
            }
        } else {
            match c {
                '"' | '\'' => quote = Some(c),
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => depth -= 1,
                '=' if depth == 0 => {
                    let prev = i.checked_sub(1).map(|p| bytes[p] as char);
                    let next = bytes.get(i + 1).map(|&b| b as char);
                    if !matches!(prev, Some('=' | '!' | '<' | '>')) && next != Some('=') {
                        let lhs = stmt[..i].trim();
                        let rhs = stmt[i + 1..].trim();
                        let name = lhs.strip_prefix("this.").unwrap_or(lhs);
                        if is_identifier(name) {
                            return Some((name, rhs));
                        }
                        return None;
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    None
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::CollectingSink;

    fn cmd(key: &str, value: NodeValue) -> Node {
        Node::detached(NodeValue::Map(IndexMap::from([(key.to_owned(), Node::detached(value))])))
    }

    #[test]
    fn sequential_prints_emit_step_and_finish() {
        let source = vec![cmd("print", NodeValue::Str("A".into())), cmd("print", NodeValue::Str("B".into())), cmd("print", NodeValue::Str("C".into()))];
        let mut script = Script::with_log(source, CollectingSink::new());
        let steps = std::rc::Rc::new(std::cell::RefCell::new(0u32));
        let counter = steps.clone();
        script.subscribe(move |_| *counter.borrow_mut() += 1);
        assert!(!script.is_done());
        for _ in 0..3 {
            script.step().unwrap();
        }
        assert!(script.is_done());
        assert_eq!(script.log.lines(), ["A", "B", "C"]);
        assert_eq!(*steps.borrow(), 3);
    }

    #[test]
    fn if_else_branches_on_expression() {
        let branch = |name: &str| cmd("if", NodeValue::Map(IndexMap::from([
            ("cond".to_owned(), Node::detached(NodeValue::ScriptExp("x>0".into()))),
            ("then".to_owned(), Node::detached(NodeValue::List(vec![cmd("print", NodeValue::Str("P".into()))]))),
            ("else".to_owned(), Node::detached(NodeValue::List(vec![cmd("print", NodeValue::Str("N".into()))]))),
        ])));
        let mut script = Script::with_log(vec![branch("x")], CollectingSink::new());
        script.set_var("x", Node::detached(NodeValue::Num(1.0)));
        script.step().unwrap();
        script.step().unwrap();
        assert_eq!(script.log.lines(), ["P"]);

        let mut script2 = Script::with_log(vec![branch("x")], CollectingSink::new());
        script2.set_var("x", Node::detached(NodeValue::Num(-1.0)));
        script2.step().unwrap();
        script2.step().unwrap();
        assert_eq!(script2.log.lines(), ["N"]);
    }

    #[test]
    fn jump_resolves_labels_in_any_order() {
        let source = vec![
            cmd("label", NodeValue::Str("start".into())),
            cmd("jump", NodeValue::Str("hello".into())),
            cmd("label", NodeValue::Str("world".into())),
            cmd("print", NodeValue::Str("W".into())),
            cmd("jump", NodeValue::Str("start".into())),
            cmd("label", NodeValue::Str("hello".into())),
            cmd("print", NodeValue::Str("H".into())),
            cmd("jump", NodeValue::Str("world".into())),
        ];
        let mut script = Script::with_log(source, CollectingSink::new());
        for _ in 0..6 {
            script.step().unwrap();
        }
        assert_eq!(script.log.lines(), ["H", "W"]);
    }

    #[test]
    fn save_patch_load_round_trip() {
        let source = vec![cmd("print", NodeValue::Str("A".into())), cmd("print", NodeValue::Str("B".into())), cmd("print", NodeValue::Str("C".into()))];
        let mut script = Script::with_log(source, CollectingSink::new());
        script.step().unwrap();
        let saved = script.save();

        let new_source = vec![
            cmd("print", NodeValue::Str("A".into())),
            cmd("print", NodeValue::Str("B".into())),
            cmd("print", NodeValue::Str("C1".into())),
            cmd("print", NodeValue::Str("C2".into())),
            cmd("print", NodeValue::Str("D".into())),
        ];
        let mut script2 = Script::with_log(new_source, CollectingSink::new());
        script2.load(&saved).unwrap();
        while !script2.is_done() {
            script2.step().unwrap();
        }
        assert_eq!(script2.log.lines(), ["B", "C1", "C2", "D"]);
    }

    #[test]
    fn eval_mutates_scope_via_this() {
        let source = vec![cmd("eval", NodeValue::Str("this.a = 1; b = this.a + 1;".into()))];
        let mut script = Script::with_log(source, CollectingSink::new());
        script.step().unwrap();
        assert_eq!(script.get_var("a").value, NodeValue::Num(1.0));
        assert_eq!(script.get_var("b").value, NodeValue::Num(2.0));
    }

    #[test]
    fn throw_carries_resolved_message_and_path() {
        let source = vec![cmd("throw", NodeValue::Str("boom".into()))];
        let mut script = Script::with_log(source, CollectingSink::new());
        let err = script.step().unwrap_err();
        assert!(matches!(err.kind, ScriptErrorKind::Thrown(ref m) if m == "boom"));
    }

    #[test]
    fn unknown_command_is_reported_with_path() {
        let source = vec![cmd("frobnicate", NodeValue::Null)];
        let mut script = Script::with_log(source, CollectingSink::new());
        let err = script.step().unwrap_err();
        assert!(matches!(err.kind, ScriptErrorKind::UnknownCommand(ref c) if c == "frobnicate"));
        assert_eq!(err.path, NodePath::root().push_index(0));
    }

    #[test]
    fn idempotent_load() {
        let source = vec![cmd("print", NodeValue::Str("A".into()))];
        let mut script = Script::with_log(source, CollectingSink::new());
        let saved = script.save();
        script.load(&saved).unwrap();
        let once = script.save();
        script.load(&saved).unwrap();
        assert_eq!(script.save(), once);
    }

}
