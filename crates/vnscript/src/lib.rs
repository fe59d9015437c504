#![doc = include_str!("../../../README.md")]

mod diff;
mod error;
mod expr;
mod io;
mod limits;
mod node;
mod parser;
mod scene;
mod scope;
mod script;
pub mod serializer;
mod stack;

pub use crate::{
    diff::{Change, diff_array, diff_array_eq},
    error::{ParserError, ParserErrorKind, ScriptError, ScriptErrorKind, SourcePos},
    expr::{ExpressionError, VarEnv},
    io::{CollectingSink, LogSink, NullSink, StdoutSink},
    limits::EngineLimits,
    node::{Node, NodeId, NodePath, NodeValue, PathSegment, as_command},
    parser::ParserContext,
    scene::{MenuEntry, Scene},
    script::{Script, ScriptEvent, SubscriptionId},
    scope::Scope,
};
