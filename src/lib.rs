#![deny(unused, nonstandard_style, rust_2018_idioms)]

//! `awl` is a compiler for a small statically-typed expression language
//! targeting the WebAssembly binary module format.
//!
//! The pipeline is synchronous and allocates a fresh syntax tree per
//! invocation: `lex → parse (→ resolve → validate) → emit`. The first
//! error aborts compilation.

pub mod asm;
pub mod errors;
pub mod sem;
pub mod syntax;

mod util;

use log::debug;

pub use errors::{CompileError, ErrorKind};
pub use syntax::Ast;

/// Parses a source text into a syntax tree; used by tooling that wants the
/// tree without code generation.
pub fn parse(source: &str) -> Result<Ast, CompileError> {
    let ast = syntax::parse(source)?;
    debug!(
        "parsed {} nodes, {} scopes, {} definitions",
        ast.nodes.len(),
        ast.scopes.len(),
        ast.defs.len()
    );
    Ok(ast)
}

/// Compiles a source text into a WebAssembly module.
pub fn compile(source: &str) -> Result<Vec<u8>, CompileError> {
    let mut ast = parse(source)?;

    sem::Resolver::new().resolve(&mut ast)?;
    sem::validator::validate(&mut ast)?;

    let bytes = asm::emit(&mut ast)?;
    debug!("emitted {} bytes", bytes.len());
    Ok(bytes)
}
