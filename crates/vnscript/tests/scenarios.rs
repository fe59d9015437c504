//! The six end-to-end scenarios from the interpreter's behavioral spec
//! (literal script sources and their expected observable outputs), run as a
//! black-box integration test against the public API only.

use pretty_assertions::assert_eq;
use vnscript::{CollectingSink, NodeValue, ParserContext, Scene, Script};

fn script(yaml: &str) -> Vec<vnscript::Node> {
    ParserContext::parse(yaml).unwrap().script().to_vec()
}

#[test]
fn sequential_print() {
    let source = script(
        r"
script:
  - print: A
  - print: B
  - print: C
",
    );
    let mut s = Script::with_log(source, CollectingSink::new());
    let steps = std::rc::Rc::new(std::cell::RefCell::new(0));
    let counter = steps.clone();
    s.subscribe(move |_| *counter.borrow_mut() += 1);

    s.step().unwrap();
    s.step().unwrap();
    s.step().unwrap();

    assert!(s.is_done());
    assert_eq!(s.log().lines(), ["A", "B", "C"]);
    assert_eq!(*steps.borrow(), 3);
}

#[test]
fn if_else_with_expression() {
    let yaml = r#"
script:
  - if:
      cond: !exp "x>0"
      then:
        - print: P
      else:
        - print: N
"#;

    let mut positive = Script::with_log(script(yaml), CollectingSink::new());
    positive.set_var("x", vnscript::Node::detached(NodeValue::Num(1.0)));
    positive.step().unwrap();
    positive.step().unwrap();
    assert_eq!(positive.log().lines(), ["P"]);

    let mut negative = Script::with_log(script(yaml), CollectingSink::new());
    negative.set_var("x", vnscript::Node::detached(NodeValue::Num(-1.0)));
    negative.step().unwrap();
    negative.step().unwrap();
    assert_eq!(negative.log().lines(), ["N"]);
}

#[test]
fn jump_target_resolution() {
    let yaml = r"
script:
  - label: start
  - jump: hello
  - label: world
  - print: W
  - jump: start
  - label: hello
  - print: H
  - jump: world
";
    let mut s = Script::with_log(script(yaml), CollectingSink::new());
    for _ in 0..6 {
        s.step().unwrap();
    }
    assert_eq!(s.log().lines(), ["H", "W"]);
}

#[test]
fn save_patch_load() {
    let before = script(
        r"
script:
  - print: A
  - print: B
  - print: C
",
    );
    let mut first = Script::with_log(before, CollectingSink::new());
    first.step().unwrap();
    let saved = first.save();

    let after = script(
        r"
script:
  - print: A
  - print: B
  - print: C1
  - print: C2
  - print: D
",
    );
    let mut second = Script::with_log(after, CollectingSink::new());
    second.load(&saved).unwrap();
    while !second.is_done() {
        second.step().unwrap();
    }
    assert_eq!(second.log().lines(), ["B", "C1", "C2", "D"]);
}

#[test]
fn scene_menu_round_trip() {
    let yaml = r#"
script:
  - label: start
  - page:
      text: "Pick One!"
  - menu:
      "Label A":
        - set:
            name: c
            value: A
      "Label B":
        - set:
            name: c
            value: B
  - page:
      text: !fmt "Picked {{c}}"
  - jump: start
"#;
    let mut scene: Scene<CollectingSink> = Scene::new(script(yaml));
    scene.next().unwrap();

    assert_eq!(scene.state().as_map().unwrap().get("text").unwrap().as_str(), Some("Pick One!"));
    let menu = scene.get_menu().expect("menu should be open");
    assert_eq!(
        menu.iter().map(|e| (e.id.as_str(), e.label.as_str())).collect::<Vec<_>>(),
        [("labelA", "Label A"), ("labelB", "Label B")]
    );

    scene.pick("labelA").unwrap();
    assert!(scene.get_menu().is_none());
    assert_eq!(scene.get_var("c").as_str(), Some("A"));
    assert_eq!(scene.state().as_map().unwrap().get("text").unwrap().as_str(), Some("Picked A"));
}

#[test]
fn audio_loop_and_pause() {
    let yaml = r"
script:
  - play:
      path: a
  - page: {}
  - play:
      path: b
      loop: true
  - page: {}
  - stop: {}
";
    let mut scene: Scene<CollectingSink> = Scene::new(script(yaml));
    let events = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let sink = events.clone();
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
    assert_eq!(*events.borrow(), vec!["play", "play", "stop"]);
}
