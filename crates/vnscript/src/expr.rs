//! A small, pure expression evaluator for `!exp` tags and `set`/`if` command
//! arguments (§4.2, Design Notes §9).
//!
//! Grammar (identifiers, property access, indexing, unary `+ - !`, binary
//! arithmetic/comparison/boolean logic, literal numbers/strings/bools/null,
//! array/object literals):
//!
//! ```text
//! expr       := logic_or
//! logic_or   := logic_and ( "||" logic_and )*
//! logic_and  := equality ( "&&" equality )*
//! equality   := comparison ( ("==" | "!=") comparison )*
//! comparison := additive ( ("<" | "<=" | ">" | ">=") additive )*
//! additive   := term ( ("+" | "-") term )*
//! term       := unary ( ("*" | "/" | "%") unary )*
//! unary      := ("+" | "-" | "!") unary | postfix
//! postfix    := primary ( "." IDENT | "[" expr "]" )*
//! primary    := NUMBER | STRING | "true" | "false" | "null" | IDENT
//!             | "(" expr ")" | "[" (expr ("," expr)* ","?)? "]"
//!             | "{" (key ":" expr ("," key ":" expr)* ","?)? "}"
//! ```

use crate::node::{Node, NodeValue};
use indexmap::IndexMap;
use std::fmt;

/// Anything that can resolve a bare identifier to a value (§4.2: "every
/// variable name is bound as a local and `vars` is the whole mapping").
pub trait VarEnv {
    fn get_var(&self, name: &str) -> Node;
    /// The whole variable mapping, exposed under the synthetic `vars` name
    /// for index-style access to names that aren't valid identifiers.
    fn vars_snapshot(&self) -> Node;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionError {
    Parse(String),
    UnknownIdentifier(String),
    TypeMismatch(String),
}

impl fmt::Display for ExpressionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(msg) => write!(f, "expression parse error: {msg}"),
            Self::UnknownIdentifier(name) => write!(f, "unknown identifier: {name}"),
            Self::TypeMismatch(msg) => write!(f, "type error: {msg}"),
        }
    }
}

impl std::error::Error for ExpressionError {}

type EResult<T> = Result<T, ExpressionError>;

/// Evaluates `src` as a single expression against `env`.
pub fn evaluate(src: &str, env: &dyn VarEnv) -> EResult<Node> {
    let tokens = lex(src)?;
    let mut parser = Parser { tokens, pos: 0 };
    let value = parser.parse_expr(env)?;
    parser.expect_eof()?;
    Ok(value)
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(f64),
    Str(String),
    Ident(String),
    Sym(&'static str),
    Eof,
}

fn lex(src: &str) -> EResult<Vec<Tok>> {
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    let mut out = Vec::new();
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let n: f64 = text
                .parse()
                .map_err(|_| ExpressionError::Parse(format!("invalid number literal: {text}")))?;
            out.push(Tok::Num(n));
            continue;
        }
        if c == '"' || c == '\'' {
            let quote = c;
            i += 1;
            let mut s = String::new();
            loop {
                let Some(&ch) = chars.get(i) else {
                    return Err(ExpressionError::Parse("unterminated string literal".into()));
                };
                if ch == quote {
                    i += 1;
                    break;
                }
                if ch == '\\' {
                    i += 1;
                    let Some(&esc) = chars.get(i) else {
                        return Err(ExpressionError::Parse("unterminated escape".into()));
                    };
                    s.push(match esc {
                        'n' => '\n',
                        't' => '\t',
                        other => other,
                    });
                    i += 1;
                } else {
                    s.push(ch);
                    i += 1;
                }
            }
            out.push(Tok::Str(s));
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            out.push(Tok::Ident(chars[start..i].iter().collect()));
            continue;
        }
        let two: Option<&'static str> = match (c, chars.get(i + 1).copied()) {
            ('=', Some('=')) => Some("=="),
            ('!', Some('=')) => Some("!="),
            ('<', Some('=')) => Some("<="),
            ('>', Some('=')) => Some(">="),
            ('&', Some('&')) => Some("&&"),
            ('|', Some('|')) => Some("||"),
            _ => None,
        };
        if let Some(sym) = two {
            out.push(Tok::Sym(sym));
            i += 2;
            continue;
        }
        let one: &'static str = match c {
            '+' => "+",
            '-' => "-",
            '*' => "*",
            '/' => "/",
            '%' => "%",
            '!' => "!",
            '<' => "<",
            '>' => ">",
            '(' => "(",
            ')' => ")",
            '[' => "[",
            ']' => "]",
            '{' => "{",
            '}' => "}",
            ',' => ",",
            ':' => ":",
            '.' => ".",
            other => return Err(ExpressionError::Parse(format!("unexpected character: {other}"))),
        };
        out.push(Tok::Sym(one));
        i += 1;
    }
    out.push(Tok::Eof);
    Ok(out)
}

struct Parser {
    tokens: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Tok {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Tok {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn eat_sym(&mut self, sym: &str) -> bool {
        if matches!(self.peek(), Tok::Sym(s) if *s == sym) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_sym(&mut self, sym: &str) -> EResult<()> {
        if self.eat_sym(sym) {
            Ok(())
        } else {
            Err(ExpressionError::Parse(format!("expected '{sym}'")))
        }
    }

    fn expect_eof(&self) -> EResult<()> {
        if matches!(self.peek(), Tok::Eof) {
            Ok(())
        } else {
            Err(ExpressionError::Parse("trailing input after expression".into()))
        }
    }

    fn parse_expr(&mut self, env: &dyn VarEnv) -> EResult<Node> {
        self.parse_or(env)
    }

    fn parse_or(&mut self, env: &dyn VarEnv) -> EResult<Node> {
        let mut lhs = self.parse_and(env)?;
        while self.eat_sym("||") {
            let rhs = self.parse_and(env)?;
            lhs = Node::detached(NodeValue::Bool(lhs.truthy() || rhs.truthy()));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self, env: &dyn VarEnv) -> EResult<Node> {
        let mut lhs = self.parse_equality(env)?;
        while self.eat_sym("&&") {
            let rhs = self.parse_equality(env)?;
            lhs = Node::detached(NodeValue::Bool(lhs.truthy() && rhs.truthy()));
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self, env: &dyn VarEnv) -> EResult<Node> {
        let mut lhs = self.parse_comparison(env)?;
        loop {
            if self.eat_sym("==") {
                let rhs = self.parse_comparison(env)?;
                lhs = Node::detached(NodeValue::Bool(lhs.value == rhs.value));
            } else if self.eat_sym("!=") {
                let rhs = self.parse_comparison(env)?;
                lhs = Node::detached(NodeValue::Bool(lhs.value != rhs.value));
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self, env: &dyn VarEnv) -> EResult<Node> {
        let mut lhs = self.parse_additive(env)?;
        loop {
            let op = match self.peek() {
                Tok::Sym("<") => "<",
                Tok::Sym("<=") => "<=",
                Tok::Sym(">") => ">",
                Tok::Sym(">=") => ">=",
                _ => break,
            };
            self.advance();
            let rhs = self.parse_additive(env)?;
            let ord = numeric_cmp(&lhs, &rhs)?;
            let result = match op {
                "<" => ord.is_lt(),
                "<=" => ord.is_le(),
                ">" => ord.is_gt(),
                _ => ord.is_ge(),
            };
            lhs = Node::detached(NodeValue::Bool(result));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self, env: &dyn VarEnv) -> EResult<Node> {
        let mut lhs = self.parse_term(env)?;
        loop {
            if self.eat_sym("+") {
                let rhs = self.parse_term(env)?;
                lhs = add(&lhs, &rhs)?;
            } else if self.eat_sym("-") {
                let rhs = self.parse_term(env)?;
                lhs = Node::detached(NodeValue::Num(as_num(&lhs)? - as_num(&rhs)?));
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn parse_term(&mut self, env: &dyn VarEnv) -> EResult<Node> {
        let mut lhs = self.parse_unary(env)?;
        loop {
            if self.eat_sym("*") {
                let rhs = self.parse_unary(env)?;
                lhs = Node::detached(NodeValue::Num(as_num(&lhs)? * as_num(&rhs)?));
            } else if self.eat_sym("/") {
                let rhs = self.parse_unary(env)?;
                lhs = Node::detached(NodeValue::Num(as_num(&lhs)? / as_num(&rhs)?));
            } else if self.eat_sym("%") {
                let rhs = self.parse_unary(env)?;
                lhs = Node::detached(NodeValue::Num(as_num(&lhs)? % as_num(&rhs)?));
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self, env: &dyn VarEnv) -> EResult<Node> {
        if self.eat_sym("-") {
            let v = self.parse_unary(env)?;
            return Ok(Node::detached(NodeValue::Num(-as_num(&v)?)));
        }
        if self.eat_sym("+") {
            let v = self.parse_unary(env)?;
            return Ok(Node::detached(NodeValue::Num(as_num(&v)?)));
        }
        if self.eat_sym("!") {
            let v = self.parse_unary(env)?;
            return Ok(Node::detached(NodeValue::Bool(!v.truthy())));
        }
        self.parse_postfix(env)
    }

    fn parse_postfix(&mut self, env: &dyn VarEnv) -> EResult<Node> {
        let mut value = self.parse_primary(env)?;
        loop {
            if self.eat_sym(".") {
                let Tok::Ident(name) = self.advance() else {
                    return Err(ExpressionError::Parse("expected property name after '.'".into()));
                };
                value = index_by_key(&value, &name)?;
            } else if self.eat_sym("[") {
                let index = self.parse_expr(env)?;
                self.expect_sym("]")?;
                value = index_value(&value, &index)?;
            } else {
                break;
            }
        }
        Ok(value)
    }

    fn parse_primary(&mut self, env: &dyn VarEnv) -> EResult<Node> {
        match self.advance() {
            Tok::Num(n) => Ok(Node::detached(NodeValue::Num(n))),
            Tok::Str(s) => Ok(Node::detached(NodeValue::Str(s))),
            Tok::Ident(name) => match name.as_str() {
                "true" => Ok(Node::detached(NodeValue::Bool(true))),
                "false" => Ok(Node::detached(NodeValue::Bool(false))),
                "null" => Ok(Node::detached(NodeValue::Null)),
                "vars" | "this" => Ok(env.vars_snapshot()),
                _ => Ok(env.get_var(&name)),
            },
            Tok::Sym("(") => {
                let inner = self.parse_expr(env)?;
                self.expect_sym(")")?;
                Ok(inner)
            }
            Tok::Sym("[") => {
                let mut items = Vec::new();
                if !self.eat_sym("]") {
                    loop {
                        items.push(self.parse_expr(env)?);
                        if self.eat_sym(",") {
                            if self.eat_sym("]") {
                                break;
                            }
                            continue;
                        }
                        self.expect_sym("]")?;
                        break;
                    }
                }
                Ok(Node::detached(NodeValue::List(items)))
            }
            Tok::Sym("{") => {
                let mut map = IndexMap::new();
                if !self.eat_sym("}") {
                    loop {
                        let key = match self.advance() {
                            Tok::Ident(name) => name,
                            Tok::Str(s) => s,
                            _ => return Err(ExpressionError::Parse("expected object key".into())),
                        };
                        self.expect_sym(":")?;
                        let value = self.parse_expr(env)?;
                        map.insert(key, value);
                        if self.eat_sym(",") {
                            if self.eat_sym("}") {
                                break;
                            }
                            continue;
                        }
                        self.expect_sym("}")?;
                        break;
                    }
                }
                Ok(Node::detached(NodeValue::Map(map)))
            }
            other => Err(ExpressionError::Parse(format!("unexpected token: {other:?}"))),
        }
    }
}

fn as_num(node: &Node) -> EResult<f64> {
    match &node.value {
        NodeValue::Num(n) => Ok(*n),
        other => Err(ExpressionError::TypeMismatch(format!("expected a number, got {other:?}"))),
    }
}

fn numeric_cmp(lhs: &Node, rhs: &Node) -> EResult<std::cmp::Ordering> {
    match (&lhs.value, &rhs.value) {
        (NodeValue::Num(a), NodeValue::Num(b)) => {
            a.partial_cmp(b).ok_or_else(|| ExpressionError::TypeMismatch("NaN is not ordered".into()))
        }
        (NodeValue::Str(a), NodeValue::Str(b)) => Ok(a.cmp(b)),
        _ => Err(ExpressionError::TypeMismatch("comparison requires two numbers or two strings".into())),
    }
}

fn add(lhs: &Node, rhs: &Node) -> EResult<Node> {
    match (&lhs.value, &rhs.value) {
        (NodeValue::Num(a), NodeValue::Num(b)) => Ok(Node::detached(NodeValue::Num(a + b))),
        (NodeValue::Str(_), _) | (_, NodeValue::Str(_)) => {
            Ok(Node::detached(NodeValue::Str(format!("{}{}", display(lhs), display(rhs)))))
        }
        _ => Err(ExpressionError::TypeMismatch("'+' requires numbers or strings".into())),
    }
}

/// Renders a value the way it would appear interpolated into a template.
#[must_use]
pub fn display(node: &Node) -> String {
    match &node.value {
        NodeValue::Null => "null".to_owned(),
        NodeValue::Bool(b) => b.to_string(),
        NodeValue::Num(n) => {
            if n.fract() == 0.0 && n.abs() < 1e15 {
                format!("{n:.0}")
            } else {
                n.to_string()
            }
        }
        NodeValue::Str(s) => s.clone(),
        NodeValue::List(_) | NodeValue::Map(_) | NodeValue::ScriptExp(_) | NodeValue::ScriptFmt(_) => {
            serde_json::to_string(&crate::serializer::node_to_json(node)).unwrap_or_default()
        }
    }
}

fn index_by_key(value: &Node, key: &str) -> EResult<Node> {
    match &value.value {
        NodeValue::Map(map) => Ok(map.get(key).cloned().unwrap_or_else(|| Node::detached(NodeValue::Null))),
        other => Err(ExpressionError::TypeMismatch(format!("cannot access property '{key}' of {other:?}"))),
    }
}

fn index_value(value: &Node, index: &Node) -> EResult<Node> {
    match (&value.value, &index.value) {
        (NodeValue::Map(map), NodeValue::Str(key)) => {
            Ok(map.get(key).cloned().unwrap_or_else(|| Node::detached(NodeValue::Null)))
        }
        (NodeValue::List(list), NodeValue::Num(n)) => {
            let idx = *n as usize;
            Ok(list.get(idx).cloned().unwrap_or_else(|| Node::detached(NodeValue::Null)))
        }
        _ => Err(ExpressionError::TypeMismatch("invalid index operation".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct TestEnv(RefCell<IndexMap<String, Node>>);

    impl VarEnv for TestEnv {
        fn get_var(&self, name: &str) -> Node {
            self.0.borrow().get(name).cloned().unwrap_or_else(|| Node::detached(NodeValue::Null))
        }

        fn vars_snapshot(&self) -> Node {
            Node::detached(NodeValue::Map(self.0.borrow().clone()))
        }
    }

    fn env(pairs: &[(&str, NodeValue)]) -> TestEnv {
        let mut map = IndexMap::new();
        for (k, v) in pairs {
            map.insert((*k).to_owned(), Node::detached(v.clone()));
        }
        TestEnv(RefCell::new(map))
    }

    #[test]
    fn arithmetic_and_comparison() {
        let e = env(&[("x", NodeValue::Num(1.0))]);
        assert_eq!(evaluate("x > 0", &e).unwrap().value, NodeValue::Bool(true));
        let e2 = env(&[("x", NodeValue::Num(-1.0))]);
        assert_eq!(evaluate("x > 0", &e2).unwrap().value, NodeValue::Bool(false));
    }

    #[test]
    fn string_concat_and_vars_index() {
        let e = env(&[("weird name", NodeValue::Str("ok".into()))]);
        let result = evaluate(r#"vars["weird name"] + "!""#, &e).unwrap();
        assert_eq!(result.value, NodeValue::Str("ok!".into()));
    }

    #[test]
    fn object_and_array_literals() {
        let e = env(&[]);
        let v = evaluate("[1, 2, 3][1]", &e).unwrap();
        assert_eq!(v.value, NodeValue::Num(2.0));
        let v = evaluate("{a: 1}.a", &e).unwrap();
        assert_eq!(v.value, NodeValue::Num(1.0));
    }
}
