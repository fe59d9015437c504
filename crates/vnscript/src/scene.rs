//! The narrative dialect layered over the generic interpreter (§4.7): adds
//! presentation state, menus, and the `page`/`menu`/`play`/`stop`/`wait`/
//! `show`/`hide` commands, falling back to [`crate::script::Script`] for
//! everything else.

use crate::error::{ScriptError, ScriptErrorKind};
use crate::io::{LogSink, StdoutSink};
use crate::limits::EngineLimits;
use crate::node::{as_command, list_at_path, path_from_node, path_to_node, Node, NodePath, NodeValue};
use crate::script::{Script, ScriptEvent, SubscriptionId};
use heck::ToLowerCamelCase;
use indexmap::IndexMap;

const STATE_KEY: &str = "state";
const YIELD_KEY: &str = "yield";
const MENU_KEY: &str = "menu";
const EVENT_KEY: &str = "event";

/// One resolved choice of the currently active menu (§3 Menu).
#[derive(Debug, Clone, PartialEq)]
pub struct MenuEntry {
    pub id: String,
    pub label: String,
    pub path: NodePath,
}

/// A [`Script`] plus presentation state and menus (§4.7).
pub struct Scene<L: LogSink = StdoutSink> {
    script: Script<L>,
    limits: EngineLimits,
}

impl<L: LogSink + Default> Scene<L> {
    #[must_use]
    pub fn new(source: Vec<Node>) -> Self {
        Self::with_log(source, L::default())
    }
}

impl<L: LogSink> Scene<L> {
    #[must_use]
    pub fn with_log(source: Vec<Node>, log: L) -> Self {
        Self::build(Script::with_log(source, log), EngineLimits::unbounded())
    }

    #[must_use]
    pub fn with_limits(source: Vec<Node>, log: L, limits: EngineLimits) -> Self {
        Self::build(Script::with_log(source, log), limits)
    }

    fn build(mut script: Script<L>, limits: EngineLimits) -> Self {
        script.enable_event_mirror(EVENT_KEY);
        script.set_var(STATE_KEY, initial_state());
        script.set_var(YIELD_KEY, Node::detached(NodeValue::Bool(true)));
        script.set_var(MENU_KEY, Node::null());
        Self { script, limits }
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.script.is_done()
    }

    #[must_use]
    pub fn get_var(&self, name: &str) -> Node {
        self.script.get_var(name)
    }

    pub fn set_var(&mut self, name: impl Into<String>, value: Node) {
        self.script.set_var(name, value);
    }

    #[must_use]
    pub fn state(&self) -> Node {
        self.script.get_var(STATE_KEY)
    }

    /// The active menu's entries, or `None` if no menu is open.
    #[must_use]
    pub fn get_menu(&self) -> Option<Vec<MenuEntry>> {
        let node = self.script.get_var(MENU_KEY);
        if matches!(node.value, NodeValue::Null) {
            return None;
        }
        let list = node.as_list()?;
        let mut out = Vec::with_capacity(list.len());
        for item in list {
            let map = item.as_map()?;
            let id = map.get("id")?.as_str()?.to_owned();
            let label = map.get("label")?.as_str()?.to_owned();
            let path = path_from_node(map.get("path")?)?;
            out.push(MenuEntry { id, label, path });
        }
        Some(out)
    }

    pub fn jump(&mut self, label: &str) -> Result<(), ScriptError> {
        self.script.jump(label)
    }

    #[must_use]
    pub fn save(&self) -> String {
        self.script.save()
    }

    pub fn load(&mut self, saved: &str) -> Result<(), ScriptError> {
        self.script.load(saved)
    }

    pub fn patch(&mut self, new_source: Vec<Node>) -> Result<(), ScriptError> {
        self.script.patch(new_source)
    }

    pub fn subscribe(&mut self, listener: impl FnMut(&ScriptEvent) + 'static) -> SubscriptionId {
        self.script.subscribe(listener)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.script.unsubscribe(id);
    }

    /// Advances execution until a command yields or the script finishes
    /// (§4.7, §5). A no-op while a menu is active.
    pub fn next(&mut self) -> Result<(), ScriptError> {
        if self.get_menu().is_some() {
            return Ok(());
        }
        self.script.set_var(YIELD_KEY, Node::detached(NodeValue::Bool(false)));
        self.reset_name_and_text();

        let mut steps = 0usize;
        while !self.yielded() && !self.script.is_done() {
            if let Some(max) = self.limits.max_steps {
                if steps >= max {
                    return Err(ScriptError::new(ScriptErrorKind::StepBudgetExceeded, NodePath::root()));
                }
            }
            self.step()?;
            steps += 1;
        }
        Ok(())
    }

    /// Resolves a menu choice: clears the menu, pushes its block, resumes
    /// `next()` (§4.7 `pick`).
    pub fn pick(&mut self, id: &str) -> Result<(), ScriptError> {
        let entries = self
            .get_menu()
            .ok_or_else(|| ScriptError::new(ScriptErrorKind::NoActiveMenu, NodePath::root()))?;
        let entry = entries
            .into_iter()
            .find(|e| e.id == id)
            .ok_or_else(|| ScriptError::new(ScriptErrorKind::UnknownMenuId(id.to_owned()), NodePath::root()))?;
        self.script.set_var(MENU_KEY, Node::null());
        let block = list_at_path(self.script.source(), &entry.path)
            .ok_or_else(|| ScriptError::new(ScriptErrorKind::UnknownMenuId(id.to_owned()), NodePath::root()))?
            .to_vec();
        self.script.push_block(&block, entry.path);
        self.next()
    }

    fn yielded(&self) -> bool {
        self.script.get_var(YIELD_KEY).truthy()
    }

    fn reset_name_and_text(&mut self) {
        let mut state = self.state_map();
        state.insert("name".to_owned(), Node::detached(NodeValue::Str(String::new())));
        state.insert("text".to_owned(), Node::detached(NodeValue::Str(String::new())));
        self.script.set_var(STATE_KEY, Node::detached(NodeValue::Map(state)));
    }

    fn state_map(&self) -> IndexMap<String, Node> {
        match self.state().value {
            NodeValue::Map(map) => map,
            _ => IndexMap::new(),
        }
    }

    /// Pulls one instruction and dispatches it through the Scene's own
    /// commands, falling back to [`Script::exec_generic`] (§4.7).
    fn step(&mut self) -> Result<(), ScriptError> {
        let Some(pulled) = self.script.stack.pull() else {
            return Ok(());
        };
        let path = pulled.frame_path.push_index(pulled.index);
        let Some((cmd, args)) = as_command(&pulled.value) else {
            return Err(ScriptError::new(
                ScriptErrorKind::InvalidArgs("a command must be a single-key mapping".into()),
                path,
            ));
        };
        match cmd {
            "page" => self.exec_page(args, &path)?,
            "menu" => self.exec_menu(args, &path)?,
            "play" => self.exec_play(args, &path)?,
            "stop" => self.exec_stop(args, &path)?,
            "wait" => self.exec_wait(args, &path)?,
            "show" => self.exec_show(args, &path)?,
            "hide" => self.exec_hide(args, &path)?,
            other => self.script.exec_generic(other, args, path.clone())?,
        }
        self.script.emit("step", Node::null());
        Ok(())
    }

    fn exec_page(&mut self, args: &Node, path: &NodePath) -> Result<(), ScriptError> {
        let resolved = self.resolve(args, path)?;
        validate_page_state(&resolved, path)?;
        let merged = merge_node(&self.state(), &resolved);
        self.script.set_var(STATE_KEY, merged);
        if !self.next_is_menu() {
            self.script.set_var(YIELD_KEY, Node::detached(NodeValue::Bool(true)));
        }
        Ok(())
    }

    fn exec_menu(&mut self, args: &Node, path: &NodePath) -> Result<(), ScriptError> {
        let map = args.as_map().ok_or_else(|| {
            ScriptError::new(ScriptErrorKind::InvalidArgs("'menu' requires a mapping of label to block".into()), path.clone())
        })?;
        let mut entry_nodes = Vec::with_capacity(map.len());
        let args_path = path.push_key("menu");
        for (label, block) in map {
            if block.as_list().is_none() {
                return Err(ScriptError::new(ScriptErrorKind::InvalidArgs(format!("menu choice '{label}' must be a block list")), path.clone()));
            }
            let id = label.to_lower_camel_case();
            let entry_path = args_path.push_key(label.clone());
            entry_nodes.push(Node::detached(NodeValue::Map(IndexMap::from([
                ("id".to_owned(), Node::detached(NodeValue::Str(id))),
                ("label".to_owned(), Node::detached(NodeValue::Str(label.clone()))),
                ("path".to_owned(), path_to_node(&entry_path)),
            ]))));
        }
        self.script.set_var(MENU_KEY, Node::detached(NodeValue::List(entry_nodes)));
        self.script.set_var(YIELD_KEY, Node::detached(NodeValue::Bool(true)));
        Ok(())
    }

    fn exec_play(&mut self, args: &Node, path: &NodePath) -> Result<(), ScriptError> {
        let resolved = self.resolve(args, path)?;
        let map = resolved
            .as_map()
            .ok_or_else(|| ScriptError::new(ScriptErrorKind::InvalidArgs("'play' requires a mapping".into()), path.clone()))?;
        require_str_field(map, "path", "play", path)?;
        require_optional_num_field(map, "volume", "play", path)?;
        require_optional_num_field(map, "rate", "play", path)?;
        let looping = map.get("loop").is_some_and(Node::truthy);
        if looping {
            let mut state = self.state_map();
            state.insert("loop".to_owned(), resolved.clone());
            self.script.set_var(STATE_KEY, Node::detached(NodeValue::Map(state)));
        }
        self.script.emit("play", resolved);
        Ok(())
    }

    fn exec_stop(&mut self, args: &Node, path: &NodePath) -> Result<(), ScriptError> {
        let resolved = self.resolve(args, path)?;
        let mut state = self.state_map();
        state.insert("loop".to_owned(), Node::null());
        self.script.set_var(STATE_KEY, Node::detached(NodeValue::Map(state)));
        self.script.emit("stop", resolved);
        Ok(())
    }

    fn exec_wait(&mut self, args: &Node, path: &NodePath) -> Result<(), ScriptError> {
        let resolved = self.resolve(args, path)?;
        let map = resolved
            .as_map()
            .ok_or_else(|| ScriptError::new(ScriptErrorKind::InvalidArgs("'wait' requires a mapping".into()), path.clone()))?;
        require_num_field(map, "seconds", "wait", path)?;
        self.script.emit("wait", resolved);
        self.script.set_var(YIELD_KEY, Node::detached(NodeValue::Bool(true)));
        Ok(())
    }

    fn exec_show(&mut self, args: &Node, path: &NodePath) -> Result<(), ScriptError> {
        let resolved = self.resolve(args, path)?;
        let map = resolved
            .as_map()
            .ok_or_else(|| ScriptError::new(ScriptErrorKind::InvalidArgs("'show' requires a mapping".into()), path.clone()))?;
        let id = require_str_field(map, "id", "show", path)?.to_owned();
        let mut state = self.state_map();
        let mut sprites: Vec<Node> = match state.get("sprites").map(|n| &n.value) {
            Some(NodeValue::List(items)) => items.clone(),
            _ => Vec::new(),
        };
        sprites.retain(|sprite| sprite.as_map().and_then(|m| m.get("id")).and_then(Node::as_str) != Some(id.as_str()));
        sprites.insert(0, resolved);
        state.insert("sprites".to_owned(), Node::detached(NodeValue::List(sprites)));
        self.script.set_var(STATE_KEY, Node::detached(NodeValue::Map(state)));
        Ok(())
    }

    fn exec_hide(&mut self, args: &Node, path: &NodePath) -> Result<(), ScriptError> {
        let resolved = self.resolve(args, path)?;
        let map = resolved
            .as_map()
            .ok_or_else(|| ScriptError::new(ScriptErrorKind::InvalidArgs("'hide' requires a mapping".into()), path.clone()))?;
        let id = require_str_field(map, "id", "hide", path)?.to_owned();
        let mut state = self.state_map();
        let mut sprites: Vec<Node> = match state.get("sprites").map(|n| &n.value) {
            Some(NodeValue::List(items)) => items.clone(),
            _ => Vec::new(),
        };
        sprites.retain(|sprite| sprite.as_map().and_then(|m| m.get("id")).and_then(Node::as_str) != Some(id.as_str()));
        state.insert("sprites".to_owned(), Node::detached(NodeValue::List(sprites)));
        self.script.set_var(STATE_KEY, Node::detached(NodeValue::Map(state)));
        Ok(())
    }

    fn resolve(&self, args: &Node, path: &NodePath) -> Result<Node, ScriptError> {
        self.script.deep_resolve(args).map_err(|e| ScriptError::new(ScriptErrorKind::Expression(e), path.clone()))
    }

    fn next_is_menu(&self) -> bool {
        self.script
            .stack
            .peek()
            .and_then(|pulled| as_command(&pulled.value).map(|(cmd, _)| cmd == "menu"))
            .unwrap_or(false)
    }
}

fn initial_state() -> Node {
    Node::detached(NodeValue::Map(IndexMap::from([
        ("name".to_owned(), Node::detached(NodeValue::Str(String::new()))),
        ("text".to_owned(), Node::detached(NodeValue::Str(String::new()))),
        (
            "background".to_owned(),
            Node::detached(NodeValue::Map(IndexMap::from([
                ("image".to_owned(), Node::null()),
                ("position".to_owned(), Node::detached(NodeValue::Str("center".to_owned()))),
                ("color".to_owned(), Node::detached(NodeValue::Str("#333".to_owned()))),
            ]))),
        ),
        ("sprites".to_owned(), Node::detached(NodeValue::List(Vec::new()))),
        ("loop".to_owned(), Node::null()),
    ])))
}

/// `page`'s deep-partial merge (§4.7): scalars and lists replace wholesale,
/// mappings merge key by key.
fn merge_node(base: &Node, patch: &Node) -> Node {
    match (&base.value, &patch.value) {
        (NodeValue::Map(base_map), NodeValue::Map(patch_map)) => {
            let mut out = base_map.clone();
            for (key, value) in patch_map {
                let merged = match out.get(key) {
                    Some(existing) => merge_node(existing, value),
                    None => value.clone(),
                };
                out.insert(key.clone(), merged);
            }
            Node::detached(NodeValue::Map(out))
        }
        _ => patch.clone(),
    }
}

/// Validates a `page` command's resolved argument against the fixed scene
/// state schema (§3 Scene state, §4.7 "validate as deep-partial strict
/// scene state"): every present key must be one of the five reserved
/// fields and match its expected shape, and unknown keys are rejected.
/// Runs before `merge_node` so an invalid `page` never touches `state`.
fn validate_page_state(node: &Node, path: &NodePath) -> Result<(), ScriptError> {
    let map = node
        .as_map()
        .ok_or_else(|| ScriptError::new(ScriptErrorKind::InvalidArgs("'page' requires a mapping".into()), path.clone()))?;
    for (key, value) in map {
        match key.as_str() {
            "name" | "text" => require_str_value(value, &format!("page.{key}"), path)?,
            "background" => validate_background(value, path)?,
            "sprites" => {
                if value.as_list().is_none() {
                    return Err(ScriptError::new(ScriptErrorKind::InvalidArgs("'page.sprites' must be a list".into()), path.clone()));
                }
            }
            "loop" => {
                if !matches!(value.value, NodeValue::Null | NodeValue::Map(_)) {
                    return Err(ScriptError::new(
                        ScriptErrorKind::InvalidArgs("'page.loop' must be an audio descriptor or null".into()),
                        path.clone(),
                    ));
                }
            }
            other => return Err(ScriptError::new(ScriptErrorKind::InvalidArgs(format!("unknown scene state field '{other}'")), path.clone())),
        }
    }
    Ok(())
}

fn validate_background(node: &Node, path: &NodePath) -> Result<(), ScriptError> {
    let map = node
        .as_map()
        .ok_or_else(|| ScriptError::new(ScriptErrorKind::InvalidArgs("'page.background' must be a mapping".into()), path.clone()))?;
    for (key, value) in map {
        match key.as_str() {
            "image" => {
                if !matches!(value.value, NodeValue::Null | NodeValue::Str(_)) {
                    return Err(ScriptError::new(
                        ScriptErrorKind::InvalidArgs("'page.background.image' must be a string or null".into()),
                        path.clone(),
                    ));
                }
            }
            "position" | "color" => require_str_value(value, &format!("page.background.{key}"), path)?,
            other => return Err(ScriptError::new(ScriptErrorKind::InvalidArgs(format!("unknown background field '{other}'")), path.clone())),
        }
    }
    Ok(())
}

fn require_str_value(node: &Node, field: &str, path: &NodePath) -> Result<(), ScriptError> {
    if node.as_str().is_some() {
        Ok(())
    } else {
        Err(ScriptError::new(ScriptErrorKind::InvalidArgs(format!("'{field}' must be a string")), path.clone()))
    }
}

/// Requires `map[field]` to be present and a string, returning it. Used by
/// `play`'s required `path` and `show`'s required `id` (§4.6 schema-driven
/// argument validation).
fn require_str_field<'a>(map: &'a IndexMap<String, Node>, field: &str, cmd: &str, path: &NodePath) -> Result<&'a str, ScriptError> {
    map.get(field)
        .and_then(Node::as_str)
        .ok_or_else(|| ScriptError::new(ScriptErrorKind::InvalidArgs(format!("'{cmd}' requires a string '{field}'")), path.clone()))
}

/// Requires `map[field]` to be present and a number, returning it. Used by
/// `wait`'s required `seconds`.
fn require_num_field(map: &IndexMap<String, Node>, field: &str, cmd: &str, path: &NodePath) -> Result<f64, ScriptError> {
    match map.get(field).map(|n| &n.value) {
        Some(NodeValue::Num(n)) => Ok(*n),
        _ => Err(ScriptError::new(ScriptErrorKind::InvalidArgs(format!("'{cmd}' requires a number '{field}'")), path.clone())),
    }
}

/// Requires `map[field]`, if present, to be a number. Used by `play`'s
/// optional `volume`/`rate`.
fn require_optional_num_field(map: &IndexMap<String, Node>, field: &str, cmd: &str, path: &NodePath) -> Result<(), ScriptError> {
    match map.get(field).map(|n| &n.value) {
        None | Some(NodeValue::Num(_)) => Ok(()),
        Some(_) => Err(ScriptError::new(ScriptErrorKind::InvalidArgs(format!("'{cmd}' field '{field}' must be a number")), path.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::CollectingSink;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn cmd(key: &str, value: NodeValue) -> Node {
        Node::detached(NodeValue::Map(IndexMap::from([(key.to_owned(), Node::detached(value))])))
    }

    #[test]
    fn menu_choice_resumes_with_rendered_template() {
        let source = vec![
            cmd("label", NodeValue::Str("start".into())),
            cmd("page", NodeValue::Map(IndexMap::from([("text".to_owned(), Node::detached(NodeValue::Str("Pick One!".into())))]))),
            cmd(
                "menu",
                NodeValue::Map(IndexMap::from([
                    (
                        "Label A".to_owned(),
                        Node::detached(NodeValue::List(vec![cmd(
                            "set",
                            NodeValue::Map(IndexMap::from([
                                ("name".to_owned(), Node::detached(NodeValue::Str("c".into()))),
                                ("value".to_owned(), Node::detached(NodeValue::Str("A".into()))),
                            ])),
                        )])),
                    ),
                    (
                        "Label B".to_owned(),
                        Node::detached(NodeValue::List(vec![cmd(
                            "set",
                            NodeValue::Map(IndexMap::from([
                                ("name".to_owned(), Node::detached(NodeValue::Str("c".into()))),
                                ("value".to_owned(), Node::detached(NodeValue::Str("B".into()))),
                            ])),
                        )])),
                    ),
                ])),
            ),
            cmd("page", NodeValue::Map(IndexMap::from([("text".to_owned(), Node::detached(NodeValue::ScriptFmt("Picked {{c}}".into())))]))),
            cmd("jump", NodeValue::Str("start".into())),
        ];
        let mut scene: Scene<CollectingSink> = Scene::new(source);
        scene.next().unwrap();
        assert_eq!(scene.state().as_map().unwrap().get("text").unwrap().as_str(), Some("Pick One!"));
        let menu = scene.get_menu().expect("menu should be open");
        assert_eq!(menu.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(), ["labelA", "labelB"]);
        assert_eq!(menu.iter().map(|e| e.label.as_str()).collect::<Vec<_>>(), ["Label A", "Label B"]);

        scene.pick("labelA").unwrap();
        assert!(scene.get_menu().is_none());
        assert_eq!(scene.get_var("c").as_str(), Some("A"));
        assert_eq!(scene.state().as_map().unwrap().get("text").unwrap().as_str(), Some("Picked A"));
    }

    #[test]
    fn audio_loop_and_pause_sequence() {
        let source = vec![
            cmd("play", NodeValue::Map(IndexMap::from([("path".to_owned(), Node::detached(NodeValue::Str("a".into())))]))),
            cmd("page", NodeValue::Map(IndexMap::new())),
            cmd(
                "play",
                NodeValue::Map(IndexMap::from([
                    ("path".to_owned(), Node::detached(NodeValue::Str("b".into()))),
                    ("loop".to_owned(), Node::detached(NodeValue::Bool(true))),
                ])),
            ),
            cmd("page", NodeValue::Map(IndexMap::new())),
            cmd("stop", NodeValue::Map(IndexMap::new())),
        ];
        let mut scene: Scene<CollectingSink> = Scene::new(source);
        let kinds = Rc::new(RefCell::new(Vec::new()));
        let sink = kinds.clone();
        scene.subscribe(move |event| {
            if event.kind != "step" {
                sink.borrow_mut().push(event.kind.clone());
            }
        });

        scene.next().unwrap();
        assert_eq!(scene.state().as_map().unwrap().get("loop").unwrap().value, NodeValue::Null);

        scene.next().unwrap();
        let loop_state = scene.state().as_map().unwrap().get("loop").unwrap().clone();
        assert_eq!(loop_state.as_map().unwrap().get("path").unwrap().as_str(), Some("b"));

        scene.next().unwrap();
        assert_eq!(scene.state().as_map().unwrap().get("loop").unwrap().value, NodeValue::Null);
        assert!(scene.is_done());
        assert_eq!(*kinds.borrow(), vec!["play".to_owned(), "play".to_owned(), "stop".to_owned()]);
    }

    #[test]
    fn show_dedupes_and_prepends_sprites_hide_removes() {
        let source = vec![
            cmd("show", NodeValue::Map(IndexMap::from([("id".to_owned(), Node::detached(NodeValue::Str("alice".into())))]))),
            cmd("show", NodeValue::Map(IndexMap::from([("id".to_owned(), Node::detached(NodeValue::Str("bob".into())))]))),
            cmd("show", NodeValue::Map(IndexMap::from([("id".to_owned(), Node::detached(NodeValue::Str("alice".into())))]))),
            cmd("hide", NodeValue::Map(IndexMap::from([("id".to_owned(), Node::detached(NodeValue::Str("bob".into())))]))),
        ];
        let mut scene: Scene<CollectingSink> = Scene::new(source);
        while !scene.is_done() {
            scene.next().unwrap();
        }
        let sprites = scene.state().as_map().unwrap().get("sprites").unwrap().as_list().unwrap().to_vec();
        assert_eq!(sprites.len(), 1);
        assert_eq!(sprites[0].as_map().unwrap().get("id").unwrap().as_str(), Some("alice"));
    }
}
