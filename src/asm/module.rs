//! Module emission.
//!
//! Orders the function and global index spaces (imports first, gapless),
//! then writes the sections the binary format mandates, in canonical order,
//! each only when it has entries. Local indices are assigned here, right
//! before each body is lowered: parameters, then declared locals, then the
//! validator's anonymous temporaries.

use super::encoder::Encoder;
use super::function;
use super::wasm::{self, Opcode, SectionId};
use crate::errors::CompileError;
use crate::syntax::tree::Literal;
use crate::syntax::{Ast, DefId, DefKind, Kind};

pub fn emit(ast: &mut Ast) -> Result<Vec<u8>, CompileError> {
    assign_indices(ast);

    let mut enc = Encoder::new();
    enc.bytes("magic", &wasm::MAGIC);
    enc.bytes("version", &wasm::VERSION);

    emit_type_section(ast, &mut enc)?;
    emit_import_section(ast, &mut enc)?;
    emit_function_section(ast, &mut enc)?;
    emit_table_section(ast, &mut enc)?;
    emit_memory_section(ast, &mut enc)?;
    emit_global_section(ast, &mut enc)?;
    emit_export_section(ast, &mut enc)?;
    emit_start_section(ast, &mut enc)?;
    emit_code_section(ast, &mut enc)?;

    Ok(enc.finish())
}

/// Imported entries take the front of each index space, defined entries
/// follow, in declaration order.
fn assign_indices(ast: &mut Ast) {
    let imports = ast.globals.imports.clone();

    let mut functions = 0u32;
    let mut globals = 0u32;
    for def_id in imports {
        match ast.def(def_id).kind {
            DefKind::Function => {
                ast.def_mut(def_id).index = functions;
                functions += 1;
            }
            DefKind::Global => {
                ast.def_mut(def_id).index = globals;
                globals += 1;
            }
            DefKind::Memory | DefKind::Table => {}
        }
    }
    for def_id in ast.globals.functions.clone() {
        ast.def_mut(def_id).index = functions;
        functions += 1;
    }
    for def_id in ast.globals.variables.clone() {
        ast.def_mut(def_id).index = globals;
        globals += 1;
    }
}

fn begin_section(enc: &mut Encoder, id: SectionId) -> super::encoder::SizeReservation {
    enc.byte("section id", id as u8);
    enc.reserve_size()
}

fn emit_type_section(ast: &Ast, enc: &mut Encoder) -> Result<(), CompileError> {
    let signatures = &ast.globals.signatures;
    if signatures.is_empty() {
        return Ok(());
    }

    let size = begin_section(enc, SectionId::Type);
    enc.uint("signature count", signatures.len() as u64)?;
    for signature in signatures {
        enc.byte("form", wasm::FUNC_TYPE);
        enc.uint("param count", signature.params.len() as u64)?;
        for &param in &signature.params {
            enc.byte("param type", wasm::value_type(param));
        }
        if signature.ret.is_void() {
            enc.uint("return count", 0)?;
        } else {
            enc.uint("return count", 1)?;
            enc.byte("return type", wasm::value_type(signature.ret));
        }
    }
    enc.patch_size(size);
    Ok(())
}

fn emit_import_section(ast: &Ast, enc: &mut Encoder) -> Result<(), CompileError> {
    let imports = &ast.globals.imports;
    if imports.is_empty() {
        return Ok(());
    }

    let size = begin_section(enc, SectionId::Import);
    enc.uint("import count", imports.len() as u64)?;
    for &def_id in imports {
        let def = ast.def(def_id);
        let source = match &def.import_source {
            Some(source) => source,
            None => panic!("import without a source"),
        };
        let mut parts = source.splitn(2, '/');
        enc.string("module", parts.next().unwrap_or(""))?;
        enc.string("field", parts.next().unwrap_or(""))?;

        match def.kind {
            DefKind::Function => {
                enc.byte("external kind", wasm::ExternalKind::Function as u8);
                let signature = match def.signature_index {
                    Some(signature) => signature,
                    None => panic!("imported function without a signature"),
                };
                enc.uint("signature index", signature as u64)?;
            }
            DefKind::Global => {
                enc.byte("external kind", wasm::ExternalKind::Global as u8);
                enc.byte("content type", wasm::value_type(def.run_type));
                enc.byte(
                    "mutability",
                    if def.mutable {
                        wasm::MUTABLE
                    } else {
                        wasm::IMMUTABLE
                    },
                );
            }
            DefKind::Table => {
                enc.byte("external kind", wasm::ExternalKind::Table as u8);
                enc.byte("element type", wasm::ELEMENT_TYPE_ANYFUNC);
                emit_limits(enc, def.limits)?;
            }
            DefKind::Memory => {
                enc.byte("external kind", wasm::ExternalKind::Memory as u8);
                emit_limits(enc, def.limits)?;
            }
        }
    }
    enc.patch_size(size);
    Ok(())
}

fn emit_function_section(ast: &Ast, enc: &mut Encoder) -> Result<(), CompileError> {
    let functions = &ast.globals.functions;
    if functions.is_empty() {
        return Ok(());
    }

    let size = begin_section(enc, SectionId::Function);
    enc.uint("function count", functions.len() as u64)?;
    for &def_id in functions {
        let signature = match ast.def(def_id).signature_index {
            Some(signature) => signature,
            None => panic!("function without a signature"),
        };
        enc.uint("signature index", signature as u64)?;
    }
    enc.patch_size(size);
    Ok(())
}

fn emit_table_section(ast: &Ast, enc: &mut Encoder) -> Result<(), CompileError> {
    let def_id = match ast.globals.table {
        Some(def_id) if !ast.def(def_id).is_imported() => def_id,
        _ => return Ok(()),
    };

    let size = begin_section(enc, SectionId::Table);
    enc.uint("table count", 1)?;
    enc.byte("element type", wasm::ELEMENT_TYPE_ANYFUNC);
    emit_limits(enc, ast.def(def_id).limits)?;
    enc.patch_size(size);
    Ok(())
}

fn emit_memory_section(ast: &Ast, enc: &mut Encoder) -> Result<(), CompileError> {
    let def_id = match ast.globals.memory {
        Some(def_id) if !ast.def(def_id).is_imported() => def_id,
        _ => return Ok(()),
    };

    let size = begin_section(enc, SectionId::Memory);
    enc.uint("memory count", 1)?;
    emit_limits(enc, ast.def(def_id).limits)?;
    enc.patch_size(size);
    Ok(())
}

fn emit_limits(enc: &mut Encoder, limits: Option<(u32, Option<u32>)>) -> Result<(), CompileError> {
    let (initial, max) = limits.unwrap_or((0, None));
    match max {
        Some(max) => {
            enc.byte("limits flags", 1);
            enc.uint("initial", initial as u64)?;
            enc.uint("maximum", max as u64)?;
        }
        None => {
            enc.byte("limits flags", 0);
            enc.uint("initial", initial as u64)?;
        }
    }
    Ok(())
}

fn emit_global_section(ast: &Ast, enc: &mut Encoder) -> Result<(), CompileError> {
    let variables = &ast.globals.variables;
    if variables.is_empty() {
        return Ok(());
    }

    let size = begin_section(enc, SectionId::Global);
    enc.uint("global count", variables.len() as u64)?;
    for &def_id in variables {
        let def = ast.def(def_id);
        enc.byte("content type", wasm::value_type(def.run_type));
        enc.byte(
            "mutability",
            if def.mutable {
                wasm::MUTABLE
            } else {
                wasm::IMMUTABLE
            },
        );
        emit_initializer(ast, enc, def_id)?;
    }
    enc.patch_size(size);
    Ok(())
}

/// Initializer expression: a typed constant, or a get of an imported
/// immutable global, terminated by `end`. Globals without an explicit
/// initializer start at zero.
fn emit_initializer(ast: &Ast, enc: &mut Encoder, def_id: DefId) -> Result<(), CompileError> {
    let def = ast.def(def_id);
    match def.initializer {
        None => {
            let literal = if def.run_type.is_integer() {
                Literal::Int(0)
            } else {
                Literal::Float(0.0)
            };
            function::const_instr(enc, def.run_type, literal, false);
        }
        Some(node) => match ast.node(node).kind {
            Kind::Variable => {
                let imported = match ast.node(node).definition {
                    Some(imported) => imported,
                    None => panic!("initializer reference left unbound"),
                };
                enc.op(Opcode::GetGlobal);
                enc.uint("global index", ast.def(imported).index as u64)?;
            }
            Kind::UnaryNegate => {
                let literal_node = ast.node(node).children[0];
                let literal = match ast.node(literal_node).literal {
                    Some(literal) => literal,
                    None => panic!("initializer literal left unparsed"),
                };
                function::const_instr(enc, def.run_type, literal, true);
            }
            _ => {
                let literal = match ast.node(node).literal {
                    Some(literal) => literal,
                    None => panic!("initializer literal left unparsed"),
                };
                function::const_instr(enc, def.run_type, literal, false);
            }
        },
    }
    enc.op(Opcode::End);
    Ok(())
}

fn emit_export_section(ast: &Ast, enc: &mut Encoder) -> Result<(), CompileError> {
    let exports = &ast.globals.exports;
    if exports.is_empty() {
        return Ok(());
    }

    let size = begin_section(enc, SectionId::Export);
    enc.uint("export count", exports.len() as u64)?;
    for (def_id, name) in exports {
        let def = ast.def(*def_id);
        enc.string("export name", name)?;
        let kind = match def.kind {
            DefKind::Function => wasm::ExternalKind::Function,
            DefKind::Table => wasm::ExternalKind::Table,
            DefKind::Memory => wasm::ExternalKind::Memory,
            DefKind::Global => wasm::ExternalKind::Global,
        };
        enc.byte("external kind", kind as u8);
        let index = match def.kind {
            DefKind::Memory | DefKind::Table => 0,
            _ => def.index,
        };
        enc.uint("export index", index as u64)?;
    }
    enc.patch_size(size);
    Ok(())
}

/// A nullary void `main` becomes the start function.
fn emit_start_section(ast: &Ast, enc: &mut Encoder) -> Result<(), CompileError> {
    let main = ast.globals.functions.iter().copied().find(|&def_id| {
        let def = ast.def(def_id);
        def.name == "main" && def.param_types.is_empty() && def.return_type.is_void()
    });

    if let Some(def_id) = main {
        let size = begin_section(enc, SectionId::Start);
        enc.uint("start function", ast.def(def_id).index as u64)?;
        enc.patch_size(size);
    }
    Ok(())
}

fn emit_code_section(ast: &mut Ast, enc: &mut Encoder) -> Result<(), CompileError> {
    let functions = ast.globals.functions.clone();
    if functions.is_empty() {
        return Ok(());
    }

    let size = begin_section(enc, SectionId::Code);
    enc.uint("body count", functions.len() as u64)?;

    for def_id in functions {
        let body = match ast.def(def_id).body {
            Some(body) => body,
            None => panic!("defined function without a body"),
        };
        let scope = ast.node(body).scope;

        // Local index space: parameters, declared locals, anonymous temps.
        let mut index = 0u32;
        let slots: Vec<DefId> = ast
            .scope(scope)
            .params
            .iter()
            .chain(ast.scope(scope).locals.iter())
            .chain(ast.scope(scope).temps.iter())
            .copied()
            .collect();
        for slot in &slots {
            ast.def_mut(*slot).index = index;
            index += 1;
        }
        let params = ast.scope(scope).params.len();

        let body_size = enc.reserve_size();
        enc.uint("local declaration count", (slots.len() - params) as u64)?;
        for &slot in &slots[params..] {
            enc.uint("local count", 1)?;
            enc.byte("local type", wasm::value_type(ast.def(slot).run_type));
        }

        function::emit_body(ast, enc, body)?;
        enc.op(Opcode::End);
        enc.patch_size(body_size);
    }

    enc.patch_size(size);
    Ok(())
}
