//! Lexing, grammar and parsing.

pub mod grammar;
pub mod parser;
pub mod tokenizer;
pub mod tree;

pub use grammar::Kind;
pub use parser::parse;
pub use tokenizer::{Token, Tokenizer};
pub use tree::{Ast, DefId, Definition, DefKind, NodeId, ScopeId, Storage};
