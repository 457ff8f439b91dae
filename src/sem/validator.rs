//! Semantic validation.
//!
//! One recursive walk over the AST computes every node's run type, selects
//! operators, allocates the anonymous temporaries the emitter needs,
//! registers jump targets, and rejects every type- and control-flow error
//! the language defines. Nodes are mutated exactly once; emission reads the
//! results.

use super::{operators, RunType};
use crate::errors::{CompileError, ErrorKind};
use crate::syntax::tree::Literal;
use crate::syntax::{Ast, DefId, Definition, DefKind, Kind, NodeId};
use crate::util::naming::temp_name;
use std::collections::{HashMap, HashSet};

pub fn validate(ast: &mut Ast) -> Result<(), CompileError> {
    Validator::new(ast).run()
}

#[derive(Debug)]
pub struct Validator<'a> {
    ast: &'a mut Ast,
    current_return: Option<RunType>,
    loop_yields: HashMap<NodeId, Vec<(NodeId, RunType)>>,
    loop_returns: HashSet<NodeId>,
}

impl<'a> Validator<'a> {
    pub fn new(ast: &'a mut Ast) -> Self {
        Self {
            ast,
            current_return: None,
            loop_yields: HashMap::new(),
            loop_returns: HashSet::new(),
        }
    }

    pub fn run(&mut self) -> Result<(), CompileError> {
        let root = self.ast.root;
        for child in self.ast.node(root).children.clone() {
            match self.ast.node(child).kind {
                Kind::Definition => self.validate_definition(child)?,
                Kind::InitExpression => self.validate_init_expression(child)?,
                Kind::Export => self.validate_export(child)?,
                Kind::Import => {
                    let declaration = self.ast.node(child).children[0];
                    self.validate_definition(declaration)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn validate_node(
        &mut self,
        id: NodeId,
        value_required: bool,
    ) -> Result<RunType, CompileError> {
        let kind = self.ast.node(id).kind;

        let run_type = match kind {
            Kind::Int32Literal
            | Kind::Int64Literal
            | Kind::Float32Literal
            | Kind::Float64Literal => self.validate_literal(id)?,

            Kind::Variable => {
                let def = self.definition_of(id);
                self.ast.def(def).run_type
            }

            Kind::UnaryNegate => {
                let child = self.ast.node(id).children[0];
                self.validate_node(child, true)?
            }

            Kind::Parenthesis | Kind::Block => self.validate_block(id, value_required)?,

            Kind::Definition => {
                self.validate_definition(id)?;
                RunType::Void
            }

            Kind::Multiplicative
            | Kind::Additive
            | Kind::MiscInfix
            | Kind::BitwiseShift
            | Kind::OrderCompare
            | Kind::EqualityCompare
            | Kind::BitwiseAnd
            | Kind::BitwiseXor
            | Kind::BitwiseOr => self.validate_binary_operator(id)?,

            Kind::UnaryMath | Kind::AllocatePages => self.validate_unary_operator(id)?,

            Kind::ShortCircuitAnd | Kind::ShortCircuitOr => self.validate_boolean(id)?,

            Kind::Assign => self.validate_assign(id, value_required)?,
            Kind::SuffixOp => self.validate_suffix(id, value_required)?,

            Kind::If => self.validate_if(id)?,
            Kind::Else => self.validate_if_else(id, value_required)?,
            Kind::Loop => self.validate_loop(id)?,
            Kind::Break => self.validate_break(id)?,
            Kind::Yield => self.validate_yield(id)?,
            Kind::Continue => self.validate_continue(id)?,
            Kind::Return => self.validate_return(id)?,

            Kind::Call => self.validate_call(id)?,
            Kind::MemoryAccess => self.validate_memory_access(id)?,

            _ => RunType::Void,
        };

        self.ast.node_mut(id).run_type = run_type;
        Ok(run_type)
    }

    /// Blocks and parentheses: every child is a statement except the last,
    /// which inherits the caller's value requirement. Unconsumed values are
    /// marked for dropping; code after an escaping child is an error.
    fn validate_block(
        &mut self,
        id: NodeId,
        value_required: bool,
    ) -> Result<RunType, CompileError> {
        let children = self.ast.node(id).children.clone();
        let mut run_type = RunType::Void;
        let mut escaped: Option<NodeId> = None;

        for (position, &child) in children.iter().enumerate() {
            if let Some(escaping) = escaped {
                return Err(self.error_related(
                    ErrorKind::UnreachableCode,
                    &[child, escaping],
                ));
            }

            let last = position + 1 == children.len();
            let child_type = self.validate_node(child, last && value_required)?;

            if self.ast.node(child).always_escapes {
                escaped = Some(child);
            } else if !last && !child_type.is_void() {
                self.ast.node_mut(child).drop_value = true;
            }
            if last {
                run_type = child_type;
            }
        }

        if let Some(&last) = children.last() {
            if self.ast.node(last).always_escapes {
                self.ast.node_mut(id).always_escapes = true;
            }
        }
        Ok(run_type)
    }

    fn validate_binary_operator(&mut self, id: NodeId) -> Result<RunType, CompileError> {
        let children = self.ast.node(id).children.clone();
        let lhs = self.validate_node(children[0], true)?;
        let rhs = self.validate_node(children[1], true)?;
        self.reject_escaping_operand(id, children[0])?;
        self.reject_escaping_operand(id, children[1])?;

        let text = self.ast.node(id).text().to_string();
        let selection = operators::binary(&text, lhs, rhs)
            .ok_or_else(|| self.error(ErrorKind::UndefinedOperator, id))?;

        self.ast.node_mut(id).operator = Some(selection);
        Ok(selection.result)
    }

    fn validate_unary_operator(&mut self, id: NodeId) -> Result<RunType, CompileError> {
        let child = self.ast.node(id).children[0];
        let operand = self.validate_node(child, true)?;
        self.reject_escaping_operand(id, child)?;

        let text = self.ast.node(id).text().to_string();
        let selection = operators::unary(&text, operand)
            .ok_or_else(|| self.error(ErrorKind::UndefinedOperator, id))?;

        self.ast.node_mut(id).operator = Some(selection);
        Ok(selection.result)
    }

    /// Short-circuit `and`/`or`: both operands share one non-void type. An
    /// `or` needs an anonymous local so the emitter can restore the tested
    /// value in the taken branch.
    fn validate_boolean(&mut self, id: NodeId) -> Result<RunType, CompileError> {
        let children = self.ast.node(id).children.clone();
        let lhs = self.validate_node(children[0], true)?;
        let rhs = self.validate_node(children[1], true)?;
        self.reject_escaping_operand(id, children[0])?;
        self.reject_escaping_operand(id, children[1])?;

        if lhs.is_void() || rhs.is_void() {
            return Err(self.error(ErrorKind::NonNumericBooleanOperand, id));
        }
        if lhs != rhs {
            return Err(self.error(ErrorKind::InconsistentBooleanType, id));
        }

        if self.ast.node(id).kind == Kind::ShortCircuitOr {
            let temp = self.intern_temp(id, lhs);
            self.ast.node_mut(id).temp_local = Some(temp);
        }
        Ok(lhs)
    }

    fn validate_assign(
        &mut self,
        id: NodeId,
        value_required: bool,
    ) -> Result<RunType, CompileError> {
        let children = self.ast.node(id).children.clone();
        let target = children[0];
        let rhs = children[1];

        let target_type = match self.ast.node(target).kind {
            Kind::MemoryAccess => {
                let element = self.validate_memory_access(target)?;
                self.ast.node_mut(target).run_type = element;
                // A tee-and-reload pattern keeps the stored value available.
                if value_required {
                    let temp = self.intern_temp(id, element);
                    self.ast.node_mut(id).temp_local = Some(temp);
                }
                element
            }
            Kind::Definition => {
                self.validate_definition(target)?;
                let def_id = self.definition_of(target);
                let def = self.ast.def(def_id);
                if def.kind != DefKind::Global {
                    return Err(self.error(ErrorKind::AssignmentTypeMismatch, id));
                }
                def.run_type
            }
            _ => {
                let def_id = self.definition_of(target);
                let def = self.ast.def(def_id);
                if !def.mutable {
                    return Err(self.error(ErrorKind::AssignmentToImmutable, id));
                }
                def.run_type
            }
        };

        let value_type = self.validate_node(rhs, true)?;
        self.reject_escaping_operand(id, rhs)?;
        if value_type != target_type {
            return Err(self.error(ErrorKind::AssignmentTypeMismatch, id));
        }

        Ok(if value_required {
            target_type
        } else {
            RunType::Void
        })
    }

    /// Suffix `++`/`--` with post-value semantics.
    fn validate_suffix(
        &mut self,
        id: NodeId,
        value_required: bool,
    ) -> Result<RunType, CompileError> {
        let target = self.ast.node(id).children[0];
        let def_id = self.definition_of(target);
        let def = self.ast.def(def_id);
        if !def.mutable {
            return Err(self.error(ErrorKind::AssignmentToImmutable, id));
        }
        let ty = def.run_type;
        self.ast.node_mut(target).run_type = ty;

        let text = if self.ast.node(id).text() == "++" { "+" } else { "-" };
        let selection = operators::binary(text, ty, ty)
            .ok_or_else(|| self.error(ErrorKind::UndefinedOperator, id))?;
        self.ast.node_mut(id).operator = Some(selection);

        Ok(if value_required { ty } else { RunType::Void })
    }

    /// `if` without `else`: the body must not produce a value.
    fn validate_if(&mut self, id: NodeId) -> Result<RunType, CompileError> {
        let children = self.ast.node(id).children.clone();
        self.validate_condition(children[0])?;

        let body_type = self.validate_node(children[1], false)?;
        if !body_type.is_void() && !self.ast.node(children[1]).always_escapes {
            return Err(self.error(ErrorKind::InconsistentType, children[1]));
        }
        Ok(RunType::Void)
    }

    fn validate_if_else(
        &mut self,
        id: NodeId,
        value_required: bool,
    ) -> Result<RunType, CompileError> {
        let children = self.ast.node(id).children.clone();
        let if_node = children[0];
        let else_branch = children[1];

        let if_children = self.ast.node(if_node).children.clone();
        self.validate_condition(if_children[0])?;

        let then_branch = if_children[1];
        let then_type = self.validate_node(then_branch, value_required)?;
        let else_type = self.validate_node(else_branch, value_required)?;
        self.ast.node_mut(if_node).run_type = then_type;

        let then_escapes = self.ast.node(then_branch).always_escapes;
        let else_escapes = self.ast.node(else_branch).always_escapes;

        let run_type = match (then_escapes, else_escapes) {
            (true, true) => {
                self.ast.node_mut(id).always_escapes = true;
                RunType::Void
            }
            (true, false) => else_type,
            (false, true) => then_type,
            (false, false) => {
                if then_type != else_type {
                    return Err(self.error(ErrorKind::InconsistentType, id));
                }
                then_type
            }
        };
        Ok(run_type)
    }

    /// Conditions are numeric; the emitter coerces non-i32 values with a
    /// compare-not-equal-zero.
    fn validate_condition(&mut self, condition: NodeId) -> Result<RunType, CompileError> {
        let ty = self.validate_node(condition, true)?;
        if ty.is_void() || self.ast.node(condition).always_escapes {
            return Err(self.error(ErrorKind::BadCondition, condition));
        }
        Ok(ty)
    }

    fn validate_loop(&mut self, id: NodeId) -> Result<RunType, CompileError> {
        self.loop_yields.insert(id, vec![]);

        let body = self.ast.node(id).children[0];
        let body_type = self.validate_node(body, false)?;
        if !body_type.is_void() && !self.ast.node(body).always_escapes {
            self.ast.node_mut(body).drop_value = true;
        }

        let yields = self.loop_yields.get(&id).cloned().unwrap_or_default();
        let has_return = self.loop_returns.contains(&id);

        if yields.is_empty() {
            if !has_return {
                return Err(self.error(ErrorKind::InfiniteLoop, id));
            }
            // Every exit is a return, so the loop never falls through.
            self.ast.node_mut(id).always_escapes = true;
            let ret = match self.current_return {
                Some(ret) => ret,
                None => panic!("loop with returns outside a function"),
            };
            return Ok(ret);
        }

        let ty = yields[0].1;
        for &(node, yield_type) in &yields[1..] {
            if yield_type != ty {
                return Err(self.error(ErrorKind::InconsistentLoopYieldType, node));
            }
        }
        Ok(ty)
    }

    fn validate_break(&mut self, id: NodeId) -> Result<RunType, CompileError> {
        let target = self
            .ast
            .enclosing_loop(id)
            .ok_or_else(|| self.error(ErrorKind::JumpOutsideLoop, id))?;
        self.ast.node_mut(id).loop_target = Some(target);
        if let Some(yields) = self.loop_yields.get_mut(&target) {
            yields.push((id, RunType::Void));
        }
        self.ast.node_mut(id).always_escapes = true;
        Ok(RunType::Void)
    }

    fn validate_yield(&mut self, id: NodeId) -> Result<RunType, CompileError> {
        let target = self
            .ast
            .enclosing_loop(id)
            .ok_or_else(|| self.error(ErrorKind::JumpOutsideLoop, id))?;
        self.ast.node_mut(id).loop_target = Some(target);

        let mut ty = RunType::Void;
        if let Some(&value) = self.ast.node(id).children.first() {
            ty = self.validate_node(value, true)?;
            self.reject_escaping_operand(id, value)?;
        }

        if let Some(yields) = self.loop_yields.get_mut(&target) {
            yields.push((id, ty));
        }
        self.ast.node_mut(id).always_escapes = true;
        Ok(RunType::Void)
    }

    fn validate_continue(&mut self, id: NodeId) -> Result<RunType, CompileError> {
        let target = self
            .ast
            .enclosing_loop(id)
            .ok_or_else(|| self.error(ErrorKind::JumpOutsideLoop, id))?;
        self.ast.node_mut(id).loop_target = Some(target);
        self.ast.node_mut(id).always_escapes = true;
        Ok(RunType::Void)
    }

    fn validate_return(&mut self, id: NodeId) -> Result<RunType, CompileError> {
        let expected = match self.current_return {
            Some(ty) => ty,
            None => panic!("return outside a function"),
        };

        // Loops on the path to the function need to know they have an exit.
        let mut current = self.ast.node(id).parent;
        while let Some(ancestor) = current {
            match self.ast.node(ancestor).kind {
                Kind::Loop => {
                    self.loop_returns.insert(ancestor);
                }
                Kind::FunctionLiteral => break,
                _ => {}
            }
            current = self.ast.node(ancestor).parent;
        }

        let mut ty = RunType::Void;
        if let Some(&value) = self.ast.node(id).children.first() {
            ty = self.validate_node(value, true)?;
            self.reject_escaping_operand(id, value)?;
        }
        if ty != expected {
            return Err(self.error(ErrorKind::ExplicitReturnTypeMismatch, id));
        }

        self.ast.node_mut(id).always_escapes = true;
        Ok(RunType::Void)
    }

    fn validate_call(&mut self, id: NodeId) -> Result<RunType, CompileError> {
        let def_id = self.definition_of(id);
        let signature_index = match self.ast.def(def_id).signature_index {
            Some(index) => index as usize,
            None => panic!("call target without a signature"),
        };
        let signature = self.ast.globals.signatures[signature_index].clone();

        let arguments = {
            let list = self.ast.node(id).children[0];
            self.ast.node(list).children.clone()
        };
        if arguments.len() != signature.params.len() {
            return Err(self.error(ErrorKind::WrongArgumentCount, id));
        }

        for (&argument, &expected) in arguments.iter().zip(signature.params.iter()) {
            let ty = self.validate_node(argument, true)?;
            self.reject_escaping_operand(id, argument)?;
            if ty != expected {
                return Err(self.error(ErrorKind::FunctionSignatureMismatch, argument));
            }
        }

        Ok(signature.ret)
    }

    /// Memory access: `p[index]` or `p[index, byte_offset]` with a static
    /// offset literal.
    fn validate_memory_access(&mut self, id: NodeId) -> Result<RunType, CompileError> {
        let def_id = self.definition_of(id);
        let element = match self.ast.def(def_id).storage {
            Some(storage) => storage.element,
            None => panic!("memory access through a non-pointer"),
        };

        let entries = {
            let brackets = self.ast.node(id).children[0];
            self.ast.node(brackets).children.clone()
        };

        let index = match entries.first() {
            Some(&index) => index,
            None => return Err(self.error(ErrorKind::AddressMustBe32Bit, id)),
        };
        let index_type = self.validate_node(index, true)?;
        self.reject_escaping_operand(id, index)?;
        if index_type != RunType::I32 {
            return Err(self.error(ErrorKind::AddressMustBe32Bit, index));
        }

        if entries.len() > 2 {
            return Err(self.error(ErrorKind::UnintelligibleSize, id));
        }
        if let Some(&offset) = entries.get(1) {
            if self.ast.node(offset).kind != Kind::Int32Literal {
                return Err(self.error(ErrorKind::UnintelligibleSize, offset));
            }
            self.validate_node(offset, true)?;
        }

        Ok(element)
    }

    /// Definitions: import sources, memory/table sizes, pointer and
    /// function-pointer prerequisites, function bodies.
    fn validate_definition(&mut self, def_node: NodeId) -> Result<(), CompileError> {
        let def_id = self.definition_of(def_node);

        if let Some(source) = self.ast.def(def_id).import_source.clone() {
            let mut parts = source.split('/');
            let module = parts.next().unwrap_or("");
            let field = parts.next().unwrap_or("");
            if module.is_empty() || field.is_empty() || parts.next().is_some() {
                return Err(self.error(ErrorKind::BadImportSource, def_node));
            }
        }

        match self.ast.def(def_id).kind {
            DefKind::Function => {
                if self.ast.def(def_id).body.is_some() {
                    self.validate_function(def_id)?;
                }
            }
            DefKind::Memory | DefKind::Table => self.validate_limits(def_node, def_id)?,
            DefKind::Global => {
                if self.ast.def(def_id).is_pointer() && self.ast.globals.memory.is_none() {
                    return Err(self.error(ErrorKind::NoMemoryForPointer, def_node));
                }
                if self.ast.def(def_id).is_function_pointer() && self.ast.globals.table.is_none()
                {
                    return Err(self.error(ErrorKind::NoTableForFunctionPointer, def_node));
                }
            }
        }
        Ok(())
    }

    fn validate_function(&mut self, def_id: DefId) -> Result<(), CompileError> {
        let body = match self.ast.def(def_id).body {
            Some(body) => body,
            None => return Ok(()),
        };
        let ret = self.ast.def(def_id).return_type;

        let block = self
            .ast
            .node(body)
            .children
            .iter()
            .copied()
            .find(|&child| self.ast.node(child).kind == Kind::Block);
        let block = match block {
            Some(block) => block,
            None => panic!("function literal without a body block"),
        };

        self.current_return = Some(ret);
        let body_type = self.validate_node(block, !ret.is_void())?;
        self.current_return = None;

        if !self.ast.node(block).always_escapes && body_type != ret {
            return Err(self.error(ErrorKind::ImplicitReturnTypeMismatch, body));
        }
        Ok(())
    }

    /// `memory(initial[, max])` / `table(initial[, max])`.
    fn validate_limits(&mut self, def_node: NodeId, def_id: DefId) -> Result<(), CompileError> {
        let value_node = self.ast.node(def_node).children[1];
        let paren = match self.ast.node(value_node).children.first() {
            Some(&paren) => paren,
            None => return Err(self.error(ErrorKind::UnintelligibleSize, def_node)),
        };
        let entries = self.ast.node(paren).children.clone();

        let initial = match entries.first() {
            Some(&node) => self.parse_size(node)?,
            None => return Err(self.error(ErrorKind::UnintelligibleSize, def_node)),
        };
        let max = match entries.get(1) {
            Some(&node) => {
                let max = self.parse_size(node)?;
                if max < initial {
                    return Err(self.error(ErrorKind::UnintelligibleSize, node));
                }
                Some(max)
            }
            None => None,
        };
        if entries.len() > 2 {
            return Err(self.error(ErrorKind::UnintelligibleSize, def_node));
        }

        self.ast.def_mut(def_id).limits = Some((initial, max));
        Ok(())
    }

    fn parse_size(&self, node: NodeId) -> Result<u32, CompileError> {
        if self.ast.node(node).kind != Kind::Int32Literal {
            return Err(self.error(ErrorKind::UnintelligibleSize, node));
        }
        self.ast
            .node(node)
            .text()
            .parse::<u32>()
            .map_err(|_| self.error(ErrorKind::UnintelligibleSize, node))
    }

    /// Global initializer: the right-hand side is a numeric literal or a
    /// reference to an imported immutable global.
    fn validate_init_expression(&mut self, id: NodeId) -> Result<(), CompileError> {
        let children = self.ast.node(id).children.clone();
        let target = children[0];
        let rhs = children[1];

        if self.ast.node(target).kind != Kind::Definition {
            // Reassignment at the root scope.
            let def_id = self.definition_of(target);
            if !self.ast.def(def_id).mutable {
                return Err(self.error(ErrorKind::AssignmentToImmutable, id));
            }
            return Err(self.error(ErrorKind::BadInitializer, id));
        }

        self.validate_definition(target)?;
        let def_id = self.definition_of(target);
        if self.ast.def(def_id).kind != DefKind::Global {
            return Err(self.error(ErrorKind::BadInitializer, id));
        }
        let declared = self.ast.def(def_id).run_type;

        let value_type = match self.ast.node(rhs).kind {
            Kind::Int32Literal
            | Kind::Int64Literal
            | Kind::Float32Literal
            | Kind::Float64Literal
            | Kind::UnaryNegate => self.validate_node(rhs, true)?,
            Kind::Variable => {
                let value_def = self.definition_of(rhs);
                let def = self.ast.def(value_def);
                if !def.is_imported() || def.mutable || def.kind != DefKind::Global {
                    return Err(self.error(ErrorKind::BadInitializer, rhs));
                }
                def.run_type
            }
            _ => return Err(self.error(ErrorKind::BadInitializer, rhs)),
        };

        if value_type != declared {
            return Err(self.error(ErrorKind::AssignmentTypeMismatch, id));
        }
        self.ast.def_mut(def_id).initializer = Some(rhs);
        Ok(())
    }

    fn validate_export(&mut self, id: NodeId) -> Result<(), CompileError> {
        let target = self.ast.node(id).children[0];

        let (def_id, name) = match self.ast.node(target).kind {
            Kind::AsRename => {
                let rename_children = self.ast.node(target).children.clone();
                let inner = rename_children[0];
                let def_id = self.export_target(inner)?;
                let name = crate::syntax::tokenizer::string_value(
                    self.ast.node(rename_children[1]).text(),
                );
                (def_id, name)
            }
            _ => {
                let def_id = self.export_target(target)?;
                let name = self.ast.def(def_id).name.clone();
                (def_id, name)
            }
        };

        if self.ast.def(def_id).mutable {
            return Err(self.error(ErrorKind::MutableExport, id));
        }

        self.ast.def_mut(def_id).export_name = Some(name.clone());
        self.ast.globals.exports.push((def_id, name));
        Ok(())
    }

    fn export_target(&self, node: NodeId) -> Result<DefId, CompileError> {
        match self.ast.node(node).kind {
            Kind::ExportType => {
                let slot = match self.ast.node(node).text() {
                    "memory" => self.ast.globals.memory,
                    _ => self.ast.globals.table,
                };
                slot.ok_or_else(|| self.error(ErrorKind::NonExistentExport, node))
            }
            _ => match self.ast.node(node).definition {
                Some(def_id) => Ok(def_id),
                None => Err(self.error(ErrorKind::NonExistentExport, node)),
            },
        }
    }

    /// Integer literals parse as unsigned decimals; a direct unary-negate
    /// parent extends the accepted range to the signed minimum. 64-bit
    /// literals go through an arbitrary-width parse bounded to the real
    /// 64-bit ranges.
    fn validate_literal(&mut self, id: NodeId) -> Result<RunType, CompileError> {
        let kind = self.ast.node(id).kind;
        let text = self.ast.node(id).text().to_string();
        let negated = self
            .ast
            .node(id)
            .parent
            .map(|parent| self.ast.node(parent).kind == Kind::UnaryNegate)
            .unwrap_or(false);

        let (literal, run_type) = match kind {
            Kind::Int32Literal => {
                let digits = text.strip_suffix("x32").unwrap_or(&text);
                let value = digits
                    .parse::<u64>()
                    .map_err(|_| self.error(ErrorKind::IntegerLiteralOutOfRange, id))?;
                let bound = if negated { 1 << 31 } else { u32::MAX as u64 };
                if value > bound {
                    return Err(self.error(ErrorKind::IntegerLiteralOutOfRange, id));
                }
                (Literal::Int(value), RunType::I32)
            }
            Kind::Int64Literal => {
                let digits = text.strip_suffix("x64").unwrap_or(&text);
                let value = digits
                    .parse::<u128>()
                    .map_err(|_| self.error(ErrorKind::IntegerLiteralOutOfRange, id))?;
                let bound = if negated { 1 << 63 } else { u64::MAX as u128 };
                if value > bound {
                    return Err(self.error(ErrorKind::IntegerLiteralOutOfRange, id));
                }
                (Literal::Int(value as u64), RunType::I64)
            }
            Kind::Float32Literal => {
                let digits = text.strip_suffix("x32").unwrap_or(&text);
                let value = digits
                    .parse::<f64>()
                    .map_err(|_| self.error(ErrorKind::IntegerLiteralOutOfRange, id))?;
                (Literal::Float(value), RunType::F32)
            }
            _ => {
                let digits = text.strip_suffix("x64").unwrap_or(&text);
                let value = digits
                    .parse::<f64>()
                    .map_err(|_| self.error(ErrorKind::IntegerLiteralOutOfRange, id))?;
                (Literal::Float(value), RunType::F64)
            }
        };

        self.ast.node_mut(id).literal = Some(literal);
        Ok(run_type)
    }

    /// One anonymous temporary per run type per function; the `.` prefix
    /// cannot appear in source identifiers.
    fn intern_temp(&mut self, at: NodeId, ty: RunType) -> DefId {
        let scope = self.ast.node(at).scope;
        let function = match self.ast.enclosing_function_scope(scope) {
            Some(function) => function,
            None => panic!("temporary local outside a function"),
        };

        for &temp in &self.ast.scope(function).temps {
            if self.ast.def(temp).run_type == ty {
                return temp;
            }
        }

        let def_id = self.ast.alloc_def(Definition {
            kind: DefKind::Global,
            name: temp_name(ty),
            token: None,
            run_type: ty,
            return_type: RunType::Void,
            mutable: true,
            scope: function,
            index: 0,
            import_source: None,
            export_name: None,
            initializer: None,
            signature_index: None,
            param_types: vec![],
            storage: None,
            limits: None,
            body: None,
            is_param: false,
        });
        self.ast.scope_mut(function).temps.push(def_id);
        def_id
    }

    fn definition_of(&self, node: NodeId) -> DefId {
        match self.ast.node(node).definition {
            Some(def) => def,
            None => panic!("node without a bound definition"),
        }
    }

    fn reject_escaping_operand(
        &self,
        parent: NodeId,
        child: NodeId,
    ) -> Result<(), CompileError> {
        if self.ast.node(child).always_escapes {
            return Err(self.error_related(ErrorKind::UnreachableCode, &[parent, child]));
        }
        Ok(())
    }

    fn error(&self, kind: ErrorKind, node: NodeId) -> CompileError {
        match &self.ast.node(node).token {
            Some(token) => CompileError::at(kind, token),
            None => CompileError::new(kind),
        }
    }

    fn error_related(&self, kind: ErrorKind, nodes: &[NodeId]) -> CompileError {
        let tokens = nodes
            .iter()
            .filter_map(|&node| self.ast.node(node).token.clone())
            .collect();
        CompileError::related(kind, tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sem::Resolver;
    use crate::syntax::parse;

    fn analyze(src: &str) -> Result<Ast, CompileError> {
        let mut ast = parse(src)?;
        Resolver::new().resolve(&mut ast)?;
        validate(&mut ast)?;
        Ok(ast)
    }

    fn error_kind(src: &str) -> ErrorKind {
        match analyze(src) {
            Err(error) => error.kind,
            Ok(_) => panic!("expected `{}` to fail validation", src),
        }
    }

    #[test]
    fn simple_function_types() {
        let ast = analyze("add: fn (a: i32, b: i32) i32 { a + b }").unwrap();

        let body = ast.def(ast.globals.functions[0]).body.unwrap();
        let block = *ast.node(body).children.last().unwrap();
        assert_eq!(ast.node(block).run_type, RunType::I32);

        let sum = ast.node(block).children[0];
        let selection = ast.node(sum).operator.unwrap();
        assert_eq!(selection.opcode, crate::asm::wasm::Opcode::I32Add);
        assert_eq!(selection.result, RunType::I32);
    }

    #[test]
    fn infinite_loop_is_detected() {
        let kind = error_kind("v: fn () { loop { i: i32\n i++ } }");
        assert_eq!(kind, ErrorKind::InfiniteLoop);
    }

    #[test]
    fn loop_with_break_is_fine() {
        assert!(analyze("v: fn () { loop { break } }").is_ok());
    }

    #[test]
    fn loop_with_only_returns_escapes() {
        let ast = analyze("v: fn () i32 { loop { return 4 } }").unwrap();
        let body = ast.def(ast.globals.functions[0]).body.unwrap();
        let block = *ast.node(body).children.last().unwrap();
        let loop_node = ast.node(block).children[0];

        assert!(ast.node(loop_node).always_escapes);
        assert_eq!(ast.node(loop_node).run_type, RunType::I32);
    }

    #[test]
    fn loop_yield_typing() {
        let ast = analyze("v: fn () i32 { loop { yield 7 } }").unwrap();
        let body = ast.def(ast.globals.functions[0]).body.unwrap();
        let block = *ast.node(body).children.last().unwrap();
        let loop_node = ast.node(block).children[0];
        assert_eq!(ast.node(loop_node).run_type, RunType::I32);

        let kind =
            error_kind("v: fn () i32 { loop { if (1) { yield 7 }\n yield 9x64 } }");
        assert_eq!(kind, ErrorKind::InconsistentLoopYieldType);
    }

    #[test]
    fn mixing_break_with_valued_yield_fails() {
        let kind = error_kind("v: fn () i32 { loop { if (1) { break }\n yield 3 } }");
        assert_eq!(kind, ErrorKind::InconsistentLoopYieldType);
    }

    #[test]
    fn assignment_to_immutable() {
        let kind = error_kind("a: immutable i32 = 5\na = 6");
        assert_eq!(kind, ErrorKind::AssignmentToImmutable);

        let kind = error_kind("v: fn () { a: immutable i32 = 5\n a = 6 }");
        assert_eq!(kind, ErrorKind::AssignmentToImmutable);
    }

    #[test]
    fn assignment_type_mismatch() {
        let kind = error_kind("v: fn () { a: i32 = 1x64 }");
        assert_eq!(kind, ErrorKind::AssignmentTypeMismatch);
    }

    #[test]
    fn undefined_operator() {
        let kind = error_kind("v: fn () f32 { 1.5x32 % 1.5x32 }");
        assert_eq!(kind, ErrorKind::UndefinedOperator);

        let kind = error_kind("v: fn () i32 { 1 + 2x64 }");
        assert_eq!(kind, ErrorKind::UndefinedOperator);
    }

    #[test]
    fn unreachable_code_after_return() {
        let kind = error_kind("v: fn () i32 { return 1\n 2 }");
        assert_eq!(kind, ErrorKind::UnreachableCode);
    }

    #[test]
    fn escaping_operand_is_unreachable() {
        let kind = error_kind("v: fn () i32 { 1 + return 2 }");
        assert_eq!(kind, ErrorKind::UnreachableCode);
    }

    #[test]
    fn if_branch_types_must_match() {
        let kind = error_kind("v: fn () i32 { if (1) { 2 } else { 2x64 } }");
        assert_eq!(kind, ErrorKind::InconsistentType);
    }

    #[test]
    fn if_with_escaping_branch_takes_the_other_type() {
        let ast =
            analyze("v: fn (c: i32) i32 { if (c) { return 1 } else { 2 } }").unwrap();
        let body = ast.def(ast.globals.functions[0]).body.unwrap();
        let block = *ast.node(body).children.last().unwrap();
        let if_else = ast.node(block).children[0];
        assert_eq!(ast.node(if_else).run_type, RunType::I32);
    }

    #[test]
    fn if_body_must_be_void() {
        let kind = error_kind("v: fn () { if (1) { 2 } }");
        assert_eq!(kind, ErrorKind::InconsistentType);
    }

    #[test]
    fn bad_condition() {
        let kind = error_kind("log: fn () { }\nv: fn () { if (log()) { } }");
        assert_eq!(kind, ErrorKind::BadCondition);
    }

    #[test]
    fn boolean_operands() {
        let kind = error_kind("v: fn () i32 { 1 and 2x64 }");
        assert_eq!(kind, ErrorKind::InconsistentBooleanType);

        let kind = error_kind("w: fn () { }\nv: fn () i32 { w() and 1 }");
        assert_eq!(kind, ErrorKind::NonNumericBooleanOperand);
    }

    #[test]
    fn or_interns_one_temp_per_type() {
        let ast = analyze("v: fn (a: i32, b: i32) i32 { (a or b) + (b or a) }").unwrap();
        let body = ast.def(ast.globals.functions[0]).body.unwrap();
        let scope = ast.node(body).scope;

        assert_eq!(ast.scope(scope).temps.len(), 1);
        let temp = ast.def(ast.scope(scope).temps[0]);
        assert_eq!(temp.run_type, RunType::I32);
        assert!(temp.name.starts_with('.'));
    }

    #[test]
    fn call_arity_and_types() {
        let base = "f: fn (a: i32) i32 { a }\n";
        assert_eq!(
            error_kind(&format!("{}v: fn () i32 {{ f(1, 2) }}", base)),
            ErrorKind::WrongArgumentCount
        );
        assert_eq!(
            error_kind(&format!("{}v: fn () i32 {{ f(1x64) }}", base)),
            ErrorKind::FunctionSignatureMismatch
        );
        assert!(analyze(&format!("{}v: fn () i32 {{ f(1) }}", base)).is_ok());
    }

    #[test]
    fn return_type_checks() {
        assert_eq!(
            error_kind("v: fn () i32 { return 1x64 }"),
            ErrorKind::ExplicitReturnTypeMismatch
        );
        assert_eq!(
            error_kind("v: fn () i32 { return }"),
            ErrorKind::ExplicitReturnTypeMismatch
        );
        assert_eq!(
            error_kind("v: fn () i32 { 1x64 }"),
            ErrorKind::ImplicitReturnTypeMismatch
        );
    }

    #[test]
    fn jump_outside_loop() {
        assert_eq!(error_kind("v: fn () { break }"), ErrorKind::JumpOutsideLoop);
        assert_eq!(error_kind("v: fn () { continue }"), ErrorKind::JumpOutsideLoop);
    }

    #[test]
    fn integer_literal_bounds() {
        assert!(analyze("a: i32 = 4294967295").is_ok());
        assert_eq!(
            error_kind("a: i32 = 4294967296"),
            ErrorKind::IntegerLiteralOutOfRange
        );
        // The signed minimum is only reachable under a negate.
        assert!(analyze("a: i32 = -2147483648").is_ok());
        assert_eq!(
            error_kind("a: i32 = -2147483649"),
            ErrorKind::IntegerLiteralOutOfRange
        );
        assert!(analyze("a: i64 = 18446744073709551615x64").is_ok());
        assert_eq!(
            error_kind("a: i64 = 18446744073709551616x64"),
            ErrorKind::IntegerLiteralOutOfRange
        );
    }

    #[test]
    fn initializer_rules() {
        assert_eq!(
            error_kind("a: i32 = 0\nb: i32 = a"),
            ErrorKind::BadInitializer
        );
        assert!(analyze(
            "import t: immutable i32 \"env/ticks\"\nb: i32 = t"
        )
        .is_ok());
        assert_eq!(
            error_kind("a: i32 = 1 + 2"),
            ErrorKind::BadInitializer
        );
    }

    #[test]
    fn import_source_format() {
        assert_eq!(
            error_kind("import log: fn (i32) \"badsource\""),
            ErrorKind::BadImportSource
        );
        assert_eq!(
            error_kind("import log: fn (i32) \"a/b/c\""),
            ErrorKind::BadImportSource
        );
    }

    #[test]
    fn memory_limits() {
        let ast = analyze("mem: memory(1, 2)").unwrap();
        let def = ast.def(ast.globals.memory.unwrap());
        assert_eq!(def.limits, Some((1, Some(2))));

        assert_eq!(error_kind("mem: memory(2, 1)"), ErrorKind::UnintelligibleSize);
        assert_eq!(error_kind("mem: memory()"), ErrorKind::UnintelligibleSize);
    }

    #[test]
    fn pointer_requires_memory() {
        assert_eq!(
            error_kind("v: fn () { p: ptr i32 = 0 }"),
            ErrorKind::NoMemoryForPointer
        );
        assert!(analyze("mem: memory(1)\nv: fn () { p: ptr i32 = 0 }").is_ok());
    }

    #[test]
    fn function_pointer_requires_table() {
        assert_eq!(
            error_kind("cb: fn_ptr (i32) i32"),
            ErrorKind::NoTableForFunctionPointer
        );
    }

    #[test]
    fn mutable_export_is_rejected() {
        assert_eq!(
            error_kind("a: i32 = 0\nexport a"),
            ErrorKind::MutableExport
        );
        assert!(analyze("a: immutable i32 = 0\nexport a as \"a\"").is_ok());
    }

    #[test]
    fn memory_address_must_be_i32() {
        let base = "mem: memory(1)\nv: fn () i32 { p: ptr i32 = 0\n ";
        assert_eq!(
            error_kind(&format!("{}p[1x64] }}", base)),
            ErrorKind::AddressMustBe32Bit
        );
        assert!(analyze(&format!("{}p[1] }}", base)).is_ok());
    }

    #[test]
    fn suffix_on_immutable() {
        assert_eq!(
            error_kind("v: fn () { a: immutable i32 = 1\n a++ }"),
            ErrorKind::AssignmentToImmutable
        );
    }
}
