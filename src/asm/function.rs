//! Function body lowering.
//!
//! Recursive walk over a validated AST, tracking the current block-nesting
//! depth so branch instructions can compute their relative targets. Every
//! node that leaves an unconsumed value behind is followed by a `drop`.

use super::encoder::Encoder;
use super::wasm::{self, Opcode};
use crate::errors::CompileError;
use crate::sem::RunType;
use crate::syntax::tree::Literal;
use crate::syntax::{Ast, DefId, Kind, NodeId};
use std::collections::HashMap;

/// Emits the body of a function literal node into `enc`.
pub fn emit_body(ast: &Ast, enc: &mut Encoder, function: NodeId) -> Result<(), CompileError> {
    let block = ast
        .node(function)
        .children
        .iter()
        .copied()
        .find(|&child| ast.node(child).kind == Kind::Block);
    let block = match block {
        Some(block) => block,
        None => panic!("function literal without a body block"),
    };

    let mut emitter = FunctionEmitter {
        ast,
        enc,
        depth: 0,
        loop_depths: HashMap::new(),
    };
    emitter.emit_node(block)
}

/// Typed constant instruction; `negated` applies a unary negate to the
/// literal.
pub fn const_instr(enc: &mut Encoder, ty: RunType, literal: Literal, negated: bool) {
    match ty {
        RunType::I32 => {
            let magnitude = match literal {
                Literal::Int(value) => value,
                Literal::Float(_) => panic!("float literal with an integer run type"),
            };
            let value = if negated {
                -(magnitude as i64)
            } else {
                magnitude as u32 as i32 as i64
            };
            enc.op(Opcode::I32Const);
            enc.sint("value", value);
        }
        RunType::I64 => {
            let magnitude = match literal {
                Literal::Int(value) => value,
                Literal::Float(_) => panic!("float literal with an integer run type"),
            };
            let value = if negated {
                (-(magnitude as i128)) as i64
            } else {
                magnitude as i64
            };
            enc.op(Opcode::I64Const);
            enc.sint("value", value);
        }
        RunType::F32 => {
            let value = match literal {
                Literal::Float(value) => value,
                Literal::Int(value) => value as f64,
            };
            enc.op(Opcode::F32Const);
            enc.float32("value", if negated { -value as f32 } else { value as f32 });
        }
        RunType::F64 => {
            let value = match literal {
                Literal::Float(value) => value,
                Literal::Int(value) => value as f64,
            };
            enc.op(Opcode::F64Const);
            enc.float64("value", if negated { -value } else { value });
        }
        RunType::Void => panic!("constant of void type"),
    }
}

struct FunctionEmitter<'a, 'e> {
    ast: &'a Ast,
    enc: &'e mut Encoder,
    depth: u32,
    /// Depth of each loop's outer block, the break/yield target.
    loop_depths: HashMap<NodeId, u32>,
}

impl<'a, 'e> FunctionEmitter<'a, 'e> {
    fn emit_node(&mut self, id: NodeId) -> Result<(), CompileError> {
        let kind = self.ast.node(id).kind;

        match kind {
            Kind::Int32Literal
            | Kind::Int64Literal
            | Kind::Float32Literal
            | Kind::Float64Literal => {
                let node = self.ast.node(id);
                const_instr(self.enc, node.run_type, self.literal_of(id), false);
            }
            Kind::UnaryNegate => {
                let child = self.ast.node(id).children[0];
                let node = self.ast.node(child);
                const_instr(self.enc, node.run_type, self.literal_of(child), true);
            }

            Kind::Variable => {
                let def = self.definition_of(id);
                self.emit_get(def)?;
            }

            Kind::Parenthesis | Kind::Block => self.emit_block(id)?,

            Kind::Multiplicative
            | Kind::Additive
            | Kind::MiscInfix
            | Kind::BitwiseShift
            | Kind::OrderCompare
            | Kind::EqualityCompare
            | Kind::BitwiseAnd
            | Kind::BitwiseXor
            | Kind::BitwiseOr => {
                let children = self.ast.node(id).children.clone();
                self.emit_node(children[0])?;
                self.emit_node(children[1])?;
                self.enc.op(self.operator_of(id));
            }

            Kind::UnaryMath | Kind::AllocatePages => {
                let child = self.ast.node(id).children[0];
                self.emit_node(child)?;
                let opcode = self.operator_of(id);
                self.enc.op(opcode);
                if opcode == Opcode::GrowMemory {
                    self.enc.uint("memory index", 0)?;
                }
            }

            Kind::ShortCircuitAnd => self.emit_and(id)?,
            Kind::ShortCircuitOr => self.emit_or(id)?,

            Kind::Assign => self.emit_assign(id)?,
            Kind::SuffixOp => self.emit_suffix(id)?,
            Kind::MemoryAccess => self.emit_load(id)?,

            Kind::If => self.emit_if(id)?,
            Kind::Else => self.emit_if_else(id)?,
            Kind::Loop => self.emit_loop(id)?,
            Kind::Break | Kind::Yield => self.emit_break_or_yield(id)?,
            Kind::Continue => self.emit_continue(id)?,
            Kind::Return => self.emit_return(id)?,
            Kind::Call => self.emit_call(id)?,

            // Local declarations produce no code.
            Kind::Definition => {}
            _ => {}
        }

        let node = self.ast.node(id);
        if node.drop_value && !node.always_escapes {
            self.enc.op(Opcode::Drop);
        }
        Ok(())
    }

    /// Singleton blocks pass through; bodies of if/else/function/loop ride
    /// the implicit block those constructs already provide; anything else
    /// wraps its children in a typed block.
    fn emit_block(&mut self, id: NodeId) -> Result<(), CompileError> {
        let children = self.ast.node(id).children.clone();
        if children.len() == 1 {
            return self.emit_node(children[0]);
        }

        let implicit = self
            .ast
            .node(id)
            .parent
            .map(|parent| {
                matches!(
                    self.ast.node(parent).kind,
                    Kind::If | Kind::Else | Kind::FunctionLiteral | Kind::Loop
                )
            })
            .unwrap_or(false);

        if implicit {
            for child in children {
                self.emit_node(child)?;
            }
            return Ok(());
        }

        self.enc.op(Opcode::Block);
        self.enc
            .byte("block type", wasm::value_type(self.ast.node(id).run_type));
        self.depth += 1;
        for child in children {
            self.emit_node(child)?;
        }
        self.enc.op(Opcode::End);
        self.depth -= 1;
        Ok(())
    }

    /// `a and b`: test the left operand against zero, push the typed zero
    /// when it fails, evaluate the right operand otherwise.
    fn emit_and(&mut self, id: NodeId) -> Result<(), CompileError> {
        let children = self.ast.node(id).children.clone();
        let ty = self.ast.node(id).run_type;

        self.emit_node(children[0])?;
        match ty {
            RunType::I32 => self.enc.op(Opcode::I32Eqz),
            RunType::I64 => self.enc.op(Opcode::I64Eqz),
            RunType::F32 => {
                const_instr(self.enc, ty, Literal::Float(0.0), false);
                self.enc.op(Opcode::F32Eq);
            }
            _ => {
                const_instr(self.enc, ty, Literal::Float(0.0), false);
                self.enc.op(Opcode::F64Eq);
            }
        }

        self.enc.op(Opcode::If);
        self.enc.byte("block type", wasm::value_type(ty));
        self.depth += 1;
        const_instr(
            self.enc,
            ty,
            if ty.is_integer() {
                Literal::Int(0)
            } else {
                Literal::Float(0.0)
            },
            false,
        );
        self.enc.op(Opcode::Else);
        self.emit_node(children[1])?;
        self.enc.op(Opcode::End);
        self.depth -= 1;
        Ok(())
    }

    /// `a or b`: tee the left operand into its temp so the taken branch can
    /// restore it. The target VM has no stack duplicate, hence the temp;
    /// `select` would evaluate both arms.
    fn emit_or(&mut self, id: NodeId) -> Result<(), CompileError> {
        let children = self.ast.node(id).children.clone();
        let ty = self.ast.node(id).run_type;
        let temp = match self.ast.node(id).temp_local {
            Some(temp) => temp,
            None => panic!("or without an allocated temp"),
        };

        self.emit_node(children[0])?;
        self.enc.op(Opcode::TeeLocal);
        self.enc.uint("local index", self.ast.def(temp).index as u64)?;
        self.emit_truthiness_test(ty);

        self.enc.op(Opcode::If);
        self.enc.byte("block type", wasm::value_type(ty));
        self.depth += 1;
        self.enc.op(Opcode::GetLocal);
        self.enc.uint("local index", self.ast.def(temp).index as u64)?;
        self.enc.op(Opcode::Else);
        self.emit_node(children[1])?;
        self.enc.op(Opcode::End);
        self.depth -= 1;
        Ok(())
    }

    /// Conditions must be i32; anything else compares not-equal against a
    /// zero constant. NaN compares unequal to zero and is therefore truthy.
    fn emit_truthiness_test(&mut self, ty: RunType) {
        match ty {
            RunType::I32 => {}
            RunType::I64 => {
                const_instr(self.enc, ty, Literal::Int(0), false);
                self.enc.op(Opcode::I64Ne);
            }
            RunType::F32 => {
                const_instr(self.enc, ty, Literal::Float(0.0), false);
                self.enc.op(Opcode::F32Ne);
            }
            RunType::F64 => {
                const_instr(self.enc, ty, Literal::Float(0.0), false);
                self.enc.op(Opcode::F64Ne);
            }
            RunType::Void => {}
        }
    }

    fn emit_assign(&mut self, id: NodeId) -> Result<(), CompileError> {
        let children = self.ast.node(id).children.clone();
        let target = children[0];
        let rhs = children[1];
        let value_needed = !self.ast.node(id).run_type.is_void();

        if self.ast.node(target).kind == Kind::MemoryAccess {
            return self.emit_store(id, target, rhs, value_needed);
        }

        let def = self.definition_of(target);
        self.emit_node(rhs)?;

        if self.is_global(def) {
            self.enc.op(Opcode::SetGlobal);
            self.enc.uint("global index", self.ast.def(def).index as u64)?;
            if value_needed {
                self.enc.op(Opcode::GetGlobal);
                self.enc.uint("global index", self.ast.def(def).index as u64)?;
            }
        } else if value_needed {
            self.enc.op(Opcode::TeeLocal);
            self.enc.uint("local index", self.ast.def(def).index as u64)?;
        } else {
            self.enc.op(Opcode::SetLocal);
            self.enc.uint("local index", self.ast.def(def).index as u64)?;
        }
        Ok(())
    }

    /// Pointer store: `(index + pointer) * size` addressing, then the typed
    /// store. A required value goes through the tee-and-reload temp.
    fn emit_store(
        &mut self,
        assign: NodeId,
        target: NodeId,
        rhs: NodeId,
        value_needed: bool,
    ) -> Result<(), CompileError> {
        let pointer = self.definition_of(target);
        let storage = match self.ast.def(pointer).storage {
            Some(storage) => storage,
            None => panic!("store through a non-pointer"),
        };
        let (index, offset) = self.access_parts(target);

        self.emit_address(index, pointer, storage.size)?;
        self.emit_node(rhs)?;

        let temp = self.ast.node(assign).temp_local;
        if value_needed {
            let temp = match temp {
                Some(temp) => temp,
                None => panic!("valued store without a temp"),
            };
            self.enc.op(Opcode::TeeLocal);
            self.enc.uint("local index", self.ast.def(temp).index as u64)?;
        }

        self.enc.op(wasm::store_opcode(&storage));
        self.enc
            .uint("alignment", alignment_log2(offset, storage.size) as u64)?;
        self.enc.uint("offset", offset as u64)?;

        if value_needed {
            let temp = match temp {
                Some(temp) => temp,
                None => panic!("valued store without a temp"),
            };
            self.enc.op(Opcode::GetLocal);
            self.enc.uint("local index", self.ast.def(temp).index as u64)?;
        }
        Ok(())
    }

    fn emit_load(&mut self, id: NodeId) -> Result<(), CompileError> {
        let pointer = self.definition_of(id);
        let storage = match self.ast.def(pointer).storage {
            Some(storage) => storage,
            None => panic!("load through a non-pointer"),
        };
        let (index, offset) = self.access_parts(id);

        self.emit_address(index, pointer, storage.size)?;
        self.enc.op(wasm::load_opcode(&storage));
        self.enc
            .uint("alignment", alignment_log2(offset, storage.size) as u64)?;
        self.enc.uint("offset", offset as u64)?;
        Ok(())
    }

    /// `index; pointer; add; size; mul` leaves the byte address on the
    /// stack.
    fn emit_address(
        &mut self,
        index: NodeId,
        pointer: DefId,
        size: u32,
    ) -> Result<(), CompileError> {
        self.emit_node(index)?;
        self.emit_get(pointer)?;
        self.enc.op(Opcode::I32Add);
        self.enc.op(Opcode::I32Const);
        self.enc.sint("element size", size as i64);
        self.enc.op(Opcode::I32Mul);
        Ok(())
    }

    /// Index expression and static byte offset of a memory-access node.
    fn access_parts(&self, target: NodeId) -> (NodeId, u32) {
        let brackets = self.ast.node(target).children[0];
        let entries = &self.ast.node(brackets).children;
        let index = entries[0];
        let offset = entries
            .get(1)
            .and_then(|&entry| self.ast.node(entry).literal)
            .map(|literal| match literal {
                Literal::Int(value) => value as u32,
                Literal::Float(_) => 0,
            })
            .unwrap_or(0);
        (index, offset)
    }

    fn emit_suffix(&mut self, id: NodeId) -> Result<(), CompileError> {
        let target = self.ast.node(id).children[0];
        let def = self.definition_of(target);
        let ty = self.ast.def(def).run_type;
        let value_needed = !self.ast.node(id).run_type.is_void();

        // Post-value semantics: the old value is loaded first when needed.
        if value_needed {
            self.emit_get(def)?;
        }
        self.emit_get(def)?;
        const_instr(
            self.enc,
            ty,
            if ty.is_integer() {
                Literal::Int(1)
            } else {
                Literal::Float(1.0)
            },
            false,
        );
        self.enc.op(self.operator_of(id));
        self.emit_set(def)?;
        Ok(())
    }

    fn emit_if(&mut self, id: NodeId) -> Result<(), CompileError> {
        let children = self.ast.node(id).children.clone();
        self.emit_condition(children[0])?;

        self.enc.op(Opcode::If);
        self.enc.byte("block type", wasm::BLOCK_VOID);
        self.depth += 1;
        self.emit_node(children[1])?;
        self.enc.op(Opcode::End);
        self.depth -= 1;
        Ok(())
    }

    fn emit_if_else(&mut self, id: NodeId) -> Result<(), CompileError> {
        let children = self.ast.node(id).children.clone();
        let if_node = children[0];
        let if_children = self.ast.node(if_node).children.clone();

        self.emit_condition(if_children[0])?;

        self.enc.op(Opcode::If);
        self.enc
            .byte("block type", wasm::value_type(self.ast.node(id).run_type));
        self.depth += 1;
        self.emit_node(if_children[1])?;
        self.enc.op(Opcode::Else);
        self.emit_node(children[1])?;
        self.enc.op(Opcode::End);
        self.depth -= 1;
        Ok(())
    }

    fn emit_condition(&mut self, condition: NodeId) -> Result<(), CompileError> {
        self.emit_node(condition)?;
        self.emit_truthiness_test(self.ast.node(condition).run_type);
        Ok(())
    }

    /// Outer block wrapping an inner loop; the block is the break/yield
    /// target, the loop header the continue target.
    fn emit_loop(&mut self, id: NodeId) -> Result<(), CompileError> {
        let body = self.ast.node(id).children[0];
        let ty = wasm::value_type(self.ast.node(id).run_type);

        self.enc.op(Opcode::Block);
        self.enc.byte("block type", ty);
        self.depth += 1;
        self.loop_depths.insert(id, self.depth);

        self.enc.op(Opcode::Loop);
        self.enc.byte("block type", ty);
        self.depth += 1;
        self.emit_node(body)?;
        // Jump back to the loop header unconditionally.
        self.enc.op(Opcode::Br);
        self.enc
            .uint("relative depth", (self.depth - self.loop_target(id) - 1) as u64)?;
        self.enc.op(Opcode::End);
        self.depth -= 1;

        self.enc.op(Opcode::End);
        self.depth -= 1;
        Ok(())
    }

    fn emit_break_or_yield(&mut self, id: NodeId) -> Result<(), CompileError> {
        if let Some(&value) = self.ast.node(id).children.first() {
            self.emit_node(value)?;
        }
        let target = self.jump_target(id);
        self.enc.op(Opcode::Br);
        self.enc
            .uint("relative depth", (self.depth - self.loop_target(target)) as u64)?;
        Ok(())
    }

    fn emit_continue(&mut self, id: NodeId) -> Result<(), CompileError> {
        let target = self.jump_target(id);
        self.enc.op(Opcode::Br);
        self.enc.uint(
            "relative depth",
            (self.depth - self.loop_target(target) - 1) as u64,
        )?;
        Ok(())
    }

    fn emit_return(&mut self, id: NodeId) -> Result<(), CompileError> {
        if let Some(&value) = self.ast.node(id).children.first() {
            self.emit_node(value)?;
        }
        self.enc.op(Opcode::Return);
        Ok(())
    }

    fn emit_call(&mut self, id: NodeId) -> Result<(), CompileError> {
        let def = self.definition_of(id);
        let arguments = {
            let list = self.ast.node(id).children[0];
            self.ast.node(list).children.clone()
        };
        for argument in arguments {
            self.emit_node(argument)?;
        }

        if self.ast.def(def).kind == crate::syntax::DefKind::Function {
            self.enc.op(Opcode::Call);
            self.enc
                .uint("function index", self.ast.def(def).index as u64)?;
        } else {
            // Indirect through the function pointer's i32 value.
            let signature = match self.ast.def(def).signature_index {
                Some(signature) => signature,
                None => panic!("indirect call without a signature"),
            };
            self.emit_get(def)?;
            self.enc.op(Opcode::CallIndirect);
            self.enc.uint("signature index", signature as u64)?;
            self.enc.byte("table index", 0);
        }
        Ok(())
    }

    fn emit_get(&mut self, def: DefId) -> Result<(), CompileError> {
        if self.is_global(def) {
            self.enc.op(Opcode::GetGlobal);
            self.enc.uint("global index", self.ast.def(def).index as u64)
        } else {
            self.enc.op(Opcode::GetLocal);
            self.enc.uint("local index", self.ast.def(def).index as u64)
        }
    }

    fn emit_set(&mut self, def: DefId) -> Result<(), CompileError> {
        if self.is_global(def) {
            self.enc.op(Opcode::SetGlobal);
            self.enc.uint("global index", self.ast.def(def).index as u64)
        } else {
            self.enc.op(Opcode::SetLocal);
            self.enc.uint("local index", self.ast.def(def).index as u64)
        }
    }

    fn is_global(&self, def: DefId) -> bool {
        self.ast.scope(self.ast.def(def).scope).is_global()
    }

    fn definition_of(&self, node: NodeId) -> DefId {
        match self.ast.node(node).definition {
            Some(def) => def,
            None => panic!("emission reached an unbound reference"),
        }
    }

    fn operator_of(&self, node: NodeId) -> Opcode {
        match self.ast.node(node).operator {
            Some(selection) => selection.opcode,
            None => panic!("emission reached an operator without a selection"),
        }
    }

    fn literal_of(&self, node: NodeId) -> Literal {
        match self.ast.node(node).literal {
            Some(literal) => literal,
            None => panic!("emission reached an unparsed literal"),
        }
    }

    fn jump_target(&self, node: NodeId) -> NodeId {
        match self.ast.node(node).loop_target {
            Some(target) => target,
            None => panic!("jump without a loop target"),
        }
    }

    fn loop_target(&self, target: NodeId) -> u32 {
        match self.loop_depths.get(&target) {
            Some(&depth) => depth,
            None => panic!("branch to a loop that was never entered"),
        }
    }
}

/// Largest power of two that divides the static byte offset, bounded above
/// by the storage size, as the log2 the binary format wants.
pub fn alignment_log2(offset: u32, size: u32) -> u32 {
    if offset == 0 {
        size.trailing_zeros()
    } else {
        offset.trailing_zeros().min(size.trailing_zeros())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_bound() {
        // Offset zero is divisible by anything: alignment is the size.
        assert_eq!(alignment_log2(0, 4), 2);
        assert_eq!(alignment_log2(0, 8), 3);
        assert_eq!(alignment_log2(0, 1), 0);

        assert_eq!(alignment_log2(4, 4), 2);
        assert_eq!(alignment_log2(2, 4), 1);
        assert_eq!(alignment_log2(3, 4), 0);
        assert_eq!(alignment_log2(8, 4), 2);
        assert_eq!(alignment_log2(6, 8), 1);
    }

    #[test]
    fn constants() {
        let mut enc = Encoder::new();
        const_instr(&mut enc, RunType::I32, Literal::Int(0), false);
        assert_eq!(enc.finish(), vec![0x41, 0x00]);

        let mut enc = Encoder::new();
        const_instr(&mut enc, RunType::I32, Literal::Int(2147483648), true);
        // i32.const -2147483648
        assert_eq!(enc.finish(), vec![0x41, 0x80, 0x80, 0x80, 0x80, 0x78]);

        let mut enc = Encoder::new();
        const_instr(&mut enc, RunType::I32, Literal::Int(4294967295), false);
        // The unsigned maximum keeps its bit pattern: -1 as varint.
        assert_eq!(enc.finish(), vec![0x41, 0x7f]);

        let mut enc = Encoder::new();
        const_instr(&mut enc, RunType::F32, Literal::Float(1.0), false);
        assert_eq!(enc.finish(), vec![0x43, 0x00, 0x00, 0x80, 0x3f]);
    }
}
