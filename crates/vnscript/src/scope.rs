//! Variable storage plus expression/template evaluation (§4.2).

use crate::expr::{self, ExpressionError, VarEnv};
use crate::node::{Node, NodeValue};
use indexmap::IndexMap;

/// The variable environment an interpreting [`crate::script::Script`] reads
/// and writes. Reads of unknown names return `null`, never an error — only
/// expression evaluation can fail.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    vars: IndexMap<String, Node>,
}

impl Scope {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Node {
        self.vars.get(name).cloned().unwrap_or_else(|| Node::detached(NodeValue::Null))
    }

    pub fn set(&mut self, name: impl Into<String>, value: Node) {
        self.vars.insert(name.into(), value);
    }

    #[must_use]
    pub fn dump(&self) -> IndexMap<String, Node> {
        self.vars.clone()
    }

    pub fn load(&mut self, vars: IndexMap<String, Node>) {
        self.vars = vars;
    }

    pub fn clear(&mut self) {
        self.vars.clear();
    }

    /// Evaluates `src` as a single expression (§4.2 `renderExpression`).
    pub fn render_expression(&self, src: &str) -> Result<Node, ExpressionError> {
        expr::evaluate(src, self)
    }

    /// Substitutes every `{{ EXPR }}` occurrence in `src` with its rendered
    /// value (§4.2 `renderTemplate`). Matching is non-greedy and brace-depth
    /// aware so an embedded object literal (`{{ {a: 1}.a }}`) does not
    /// truncate the expression early.
    pub fn render_template(&self, src: &str) -> Result<String, ExpressionError> {
        let mut out = String::new();
        let mut literal_start = 0;
        let mut i = 0;
        while i < src.len() {
            if src[i..].starts_with("{{") {
                out.push_str(&src[literal_start..i]);
                let expr_start = i + 2;
                let Some(expr_end) = find_close(src, expr_start) else {
                    out.push_str(&src[i..]);
                    return Ok(out);
                };
                let inner = src[expr_start..expr_end].trim();
                let value = self.render_expression(inner)?;
                out.push_str(&expr::display(&value));
                i = expr_end + 2;
                literal_start = i;
            } else {
                i += src[i..].chars().next().map_or(1, char::len_utf8);
            }
        }
        out.push_str(&src[literal_start..]);
        Ok(out)
    }
}

/// Finds the index of the `}}` that closes the `{{` opened at `start`,
/// treating any `{`/`}` within the expression body as balanced nesting (so
/// object literals inside a template don't close it prematurely).
fn find_close(src: &str, start: usize) -> Option<usize> {
    let bytes = src.as_bytes();
    let mut depth = 0i32;
    let mut i = start;
    while i < bytes.len() {
        if bytes[i] == b'}' && bytes.get(i + 1) == Some(&b'}') && depth == 0 {
            return Some(i);
        }
        if bytes[i] == b'{' {
            depth += 1;
        } else if bytes[i] == b'}' {
            depth -= 1;
        }
        i += 1;
    }
    None
}

impl VarEnv for Scope {
    fn get_var(&self, name: &str) -> Node {
        self.get(name)
    }

    fn vars_snapshot(&self) -> Node {
        Node::detached(NodeValue::Map(self.vars.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_reads_are_null() {
        let scope = Scope::new();
        assert_eq!(scope.get("missing").value, NodeValue::Null);
    }

    #[test]
    fn template_renders_simple_identifier() {
        let mut scope = Scope::new();
        scope.set("name", Node::detached(NodeValue::Str("Ada".into())));
        assert_eq!(scope.render_template("Hi {{name}}!").unwrap(), "Hi Ada!");
    }

    #[test]
    fn scope_law_template_matches_stringified_expression() {
        let mut scope = Scope::new();
        scope.set("x", Node::detached(NodeValue::Num(7.0)));
        let rendered = scope.render_template("{{x}}").unwrap();
        let evaluated = scope.render_expression("x").unwrap();
        assert_eq!(rendered, expr::display(&evaluated));
    }

    #[test]
    fn template_handles_nested_braces() {
        let mut scope = Scope::new();
        scope.set("c", Node::detached(NodeValue::Str("A".into())));
        assert_eq!(scope.render_template("Picked {{c}}").unwrap(), "Picked A");
    }
}
