//! The explicit execution stack that makes the interpreter pausable,
//! resumable, savable, and patchable (§4.1).

use crate::diff::{diff_array, Change};
use crate::node::{Node, NodePath};

/// `(code, programCounter)` plus the path of `code` within the script's
/// `source`, carried so [`crate::script::Script::save`] can serialize a
/// frame without the stack needing to know about `source` itself.
#[derive(Debug, Clone)]
pub struct Frame {
    pub code: Vec<Node>,
    pub pc: usize,
    pub path: NodePath,
}

impl Frame {
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.pc >= self.code.len()
    }
}

/// The value returned by [`Stack::peek`]/[`Stack::pull`]: which frame (by
/// stack index) the instruction came from, its index within that frame's
/// code, and the instruction itself.
#[derive(Debug, Clone)]
pub struct Pulled {
    pub frame_index: usize,
    pub index: usize,
    pub value: Node,
    /// The path (within the script source) of the frame this instruction
    /// came from, captured before a possible pop so callers can still
    /// build a full node path after the frame is gone (§4.6 error paths).
    pub frame_path: NodePath,
}

/// A LIFO collection of [`Frame`]s. The active frame is the top (the last
/// element of `frames`); the root frame is the bottom (`frames[0]`).
#[derive(Debug, Clone, Default)]
pub struct Stack {
    frames: Vec<Frame>,
}

impl Stack {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a new frame with `pc = 0` and returns its stack index, used
    /// later to address it with [`Stack::patch`].
    pub fn push(&mut self, code: Vec<Node>, path: NodePath) -> usize {
        self.frames.push(Frame { code, pc: 0, path });
        self.frames.len() - 1
    }

    /// Pushes a frame with an explicit `pc`, used by `load` to restore a
    /// saved frame before [`Stack::patch`] reconciles it against possibly
    /// edited source.
    pub fn push_frame(&mut self, frame: Frame) -> usize {
        self.frames.push(frame);
        self.frames.len() - 1
    }

    #[must_use]
    pub fn frame(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index)
    }

    /// Returns the current instruction without advancing. Only the top
    /// frame is ever consulted: if it is exhausted, peek returns `None`
    /// without popping it (§4.1).
    #[must_use]
    pub fn peek(&self) -> Option<Pulled> {
        let index = self.frames.len().checked_sub(1)?;
        let frame = &self.frames[index];
        if frame.is_exhausted() {
            return None;
        }
        Some(Pulled {
            frame_index: index,
            index: frame.pc,
            value: frame.code[frame.pc].clone(),
            frame_path: frame.path.clone(),
        })
    }

    /// Same as [`Stack::peek`], then advances `pc`. If the top frame was
    /// already exhausted (e.g. after a patch shrank it below its `pc`), it
    /// is popped and the new top is tried in its place, cascading until a
    /// value is found or the stack empties (§3: "removed from the stack on
    /// the next pull").
    pub fn pull(&mut self) -> Option<Pulled> {
        loop {
            let index = self.frames.len().checked_sub(1)?;
            if self.frames[index].is_exhausted() {
                self.frames.pop();
                continue;
            }
            let pc = self.frames[index].pc;
            let value = self.frames[index].code[pc].clone();
            let frame_path = self.frames[index].path.clone();
            self.frames[index].pc += 1;
            if self.frames[index].is_exhausted() {
                self.frames.pop();
            }
            return Some(Pulled { frame_index: index, index: pc, value, frame_path });
        }
    }

    /// Returns the root frame (stack index 0), creating it with the given
    /// code if the stack is currently empty (§4.6 `jump`: "pushing root if
    /// stack is empty").
    pub fn ensure_root(&mut self, code: Vec<Node>) -> &mut Frame {
        if self.frames.is_empty() {
            self.frames.push(Frame { code, pc: 0, path: NodePath::root() });
        }
        &mut self.frames[0]
    }

    /// True if no frame (from the top down) can yield another value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.iter().all(Frame::is_exhausted)
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Observable list of frames, root first, used by `save` (§4.1).
    #[must_use]
    pub fn dump(&self) -> &[Frame] {
        &self.frames
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Replaces the frame at `frame_index`'s code with `new_code`, shifting
    /// its `pc` to track the same logical instruction via a line-level diff
    /// (§4.1 algorithm).
    pub fn patch(&mut self, frame_index: usize, new_code: Vec<Node>) {
        let Some(frame) = self.frames.get_mut(frame_index) else { return };
        let changes = diff_array(&frame.code, &new_code, |a, b| a.value == b.value);
        let original_pc = frame.pc;
        let mut cursor = 0usize;
        let mut pc = original_pc as i64;

        for change in &changes {
            if cursor >= original_pc {
                break;
            }
            match change {
                Change::Kept { .. } => cursor += 1,
                Change::Removed { .. } => pc -= 1,
                Change::Inserted { .. } => pc += 1,
            }
        }

        let clamped = pc.max(0) as usize;
        frame.pc = clamped.min(new_code.len());
        frame.code = new_code;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeValue;

    fn leaf(s: &str) -> Node {
        Node::detached(NodeValue::Str(s.to_owned()))
    }

    fn code(items: &[&str]) -> Vec<Node> {
        items.iter().map(|s| leaf(s)).collect()
    }

    #[test]
    fn peek_does_not_advance_or_pop() {
        let mut stack = Stack::new();
        stack.push(code(&["A", "B"]), NodePath::root());
        let p1 = stack.peek().unwrap();
        let p2 = stack.peek().unwrap();
        assert_eq!(p1.value, p2.value);
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn pull_advances_and_pops_when_exhausted() {
        let mut stack = Stack::new();
        stack.push(code(&["A"]), NodePath::root());
        assert!(!stack.is_empty());
        let pulled = stack.pull().unwrap();
        assert_eq!(pulled.value, leaf("A"));
        assert!(stack.is_empty());
        assert!(stack.pull().is_none());
    }

    #[test]
    fn patch_before_pc_shifts_position() {
        let mut stack = Stack::new();
        let idx = stack.push(code(&["A", "B", "C"]), NodePath::root());
        stack.pull(); // consumes A, pc=1
        stack.patch(idx, code(&["B", "C"])); // A removed
        let pulled = stack.pull().unwrap();
        assert_eq!(pulled.value, leaf("B"));
    }

    #[test]
    fn patch_at_pc_resumes_at_first_insert() {
        let mut stack = Stack::new();
        let idx = stack.push(code(&["A", "B", "C"]), NodePath::root());
        stack.pull(); // consumes A, pc=1 (next is B)
        stack.patch(idx, code(&["A", "X", "C"])); // B replaced by X
        let pulled = stack.pull().unwrap();
        assert_eq!(pulled.value, leaf("X"));
    }

    #[test]
    fn patch_after_pc_is_unaffected() {
        let mut stack = Stack::new();
        let idx = stack.push(code(&["A", "B", "C"]), NodePath::root());
        stack.pull(); // pc=1
        stack.patch(idx, code(&["A", "B", "C1", "C2", "D"]));
        let mut out = Vec::new();
        while let Some(p) = stack.pull() {
            out.push(p.value);
        }
        assert_eq!(out, code(&["B", "C1", "C2", "D"]));
    }

    #[test]
    fn patch_clamps_pc_past_new_end() {
        let mut stack = Stack::new();
        stack.push(code(&["A", "B", "C"]), NodePath::root());
        stack.pull();
        stack.pull();
        stack.pull();
        assert!(stack.is_empty());
        // Force a stale frame back with pc at old length, then shrink it.
        let idx = stack.push_frame(Frame { code: code(&["A", "B", "C"]), pc: 3, path: NodePath::root() });
        stack.patch(idx, code(&["A"]));
        assert!(stack.frame(idx).unwrap().is_exhausted());
    }
}
