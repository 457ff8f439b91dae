//! Pratt/precedence-climbing parser.
//!
//! The parser holds a single current node and a current token. Each
//! iteration either consumes a token (creating a child of the current node)
//! or ascends. A node only enters its parent's child list through `place`,
//! where child- and parent-type constraints are checked and definition and
//! reference bookkeeping happens.
//!
//! A completed node triggers a placement decision against the next token
//! `R`: if `R` takes no left operand the node is placed into its parent;
//! otherwise `R` steals the node iff `R` binds tighter than the parent (or
//! equally tight and right-associative).

use super::grammar::{self, Kind};
use super::tokenizer::{string_value, Tokenizer};
use super::tree::{Ast, Definition, DefKind, NodeId, ScopeId, ScopeKind, Storage};
use crate::errors::{CompileError, ErrorKind};
use crate::sem::RunType;

pub fn parse<S: AsRef<str> + ?Sized>(src: &S) -> Result<Ast, CompileError> {
    let tokenizer = Tokenizer::from_string(src.as_ref());
    let mut parser = Parser::new(tokenizer);
    parser.parse()?;
    Ok(parser.ast)
}

#[derive(Debug)]
pub struct Parser<'a> {
    tokenizer: Tokenizer<'a>,
    ast: Ast,
    current: NodeId,
}

impl<'a> Parser<'a> {
    pub fn new(tokenizer: Tokenizer<'a>) -> Self {
        let ast = Ast::new();
        let current = ast.root;
        Self {
            tokenizer,
            ast,
            current,
        }
    }

    fn parse(&mut self) -> Result<(), CompileError> {
        loop {
            let next_kind = self.tokenizer.peek_kind();
            if next_kind.is_skip() {
                self.tokenizer.next_token();
                continue;
            }
            if next_kind == Kind::BadToken {
                return Err(CompileError::at(
                    ErrorKind::MysteriousSymbol,
                    self.tokenizer.peek(),
                ));
            }

            if self.ast.node(self.current).complete {
                if self.current == self.ast.root {
                    return Ok(());
                }
                self.place_completed(next_kind)?;
            } else {
                self.extend_current(next_kind)?;
            }
        }
    }

    /// Placement decision for the completed current node.
    fn place_completed(&mut self, next_kind: Kind) -> Result<(), CompileError> {
        let current = self.current;
        let parent = match self.ast.node(current).parent {
            Some(parent) => parent,
            None => panic!("completed non-root node without a parent"),
        };

        let next_props = next_kind.props();
        if !next_kind.is_terminator() && next_props.left_operands > 0 {
            let parent_kind = self.ast.node(parent).kind;
            let parent_precedence = parent_kind.props().precedence;
            let steals = next_props.precedence > parent_precedence
                || (next_props.precedence == parent_precedence && next_props.right_associative);

            if steals {
                let token = self.tokenizer.next_token();
                let kind = grammar::override_kind(token.kind, parent_kind);
                let scope = self.scope_for(kind, parent);
                let node = self.ast.alloc_node(kind, Some(token), Some(parent), scope);
                self.place(current, node)?;
                self.current = node;
                return Ok(());
            }
        }

        self.place(current, parent)?;
        self.current = parent;
        Ok(())
    }

    /// Grow the incomplete current node: handle terminators or create a new
    /// child from the next token.
    fn extend_current(&mut self, next_kind: Kind) -> Result<(), CompileError> {
        let current = self.current;
        let node_kind = self.ast.node(current).kind;
        let child_count = self.ast.node(current).children.len();

        // A signature's trailing return type is optional; the signature is
        // complete as soon as something other than a type name follows.
        if matches!(node_kind, Kind::FunctionSignature | Kind::FunctionPointer)
            && child_count > 0
            && next_kind != Kind::TypeName
        {
            self.ast.node_mut(current).complete = true;
            return Ok(());
        }

        if next_kind.is_terminator() {
            let props = node_kind.props();
            if props.requires_terminator == Some(next_kind) {
                self.tokenizer.next_token();
                self.ast.node_mut(current).complete = true;
            } else if props.ignores_terminator.contains(&next_kind) {
                self.tokenizer.next_token();
            } else if matches!(node_kind, Kind::Return | Kind::Yield) && child_count == 0 {
                // A bare return/yield accepts any terminator and leaves it
                // for the enclosing node to re-examine.
                self.ast.node_mut(current).complete = true;
            } else {
                return Err(CompileError::at(
                    ErrorKind::MisplacedTerminatorOrUnfinishedExpression,
                    self.tokenizer.peek(),
                ));
            }
            return Ok(());
        }

        let token = self.tokenizer.next_token();
        let mut kind = grammar::override_kind(token.kind, node_kind);

        if kind.props().left_operands > 0 {
            // A subtract with no left operand is a unary negate.
            if kind == Kind::Additive && token.text == "-" {
                kind = Kind::UnaryNegate;
            } else {
                return Err(CompileError::at(
                    ErrorKind::MisplacedTerminatorOrUnfinishedExpression,
                    &token,
                ));
            }
        }

        let scope = self.scope_for(kind, current);
        let child = self.ast.alloc_node(kind, Some(token), Some(current), scope);

        let props = kind.props();
        if !props.open && kind.expected_child_count() == 0 {
            self.ast.node_mut(child).complete = true;
        }
        self.current = child;
        Ok(())
    }

    /// The scope a node created under `parent` lives in: a fresh scope for
    /// scope-creating kinds, the parent's scope otherwise.
    fn scope_for(&mut self, kind: Kind, parent: NodeId) -> ScopeId {
        let enclosing = self.ast.node(parent).scope;
        if !kind.props().creates_scope {
            return enclosing;
        }
        let scope_kind = match kind {
            Kind::FunctionLiteral => ScopeKind::Function,
            Kind::Loop => ScopeKind::Loop,
            _ => ScopeKind::Block,
        };
        self.ast.alloc_scope(scope_kind, enclosing)
    }

    /// Commits `node` as the next child of `into`, checking the child- and
    /// parent-type constraints and performing definition/reference
    /// bookkeeping.
    fn place(&mut self, node: NodeId, into: NodeId) -> Result<(), CompileError> {
        let position = self.ast.node(into).children.len();
        let child_kind = self.ast.node(node).kind;
        let parent_kind = self.ast.node(into).kind;

        if !grammar::accepts_child(parent_kind, position, child_kind) {
            return Err(self.error_at(ErrorKind::ChildTypeConstraintViolation, node));
        }
        if !grammar::accepts_parent(child_kind, parent_kind, position) {
            return Err(self.error_at(ErrorKind::ParentTypeConstraintViolation, node));
        }

        self.ast.node_mut(node).parent = Some(into);
        self.ast.node_mut(into).children.push(node);

        if child_kind.props().creates_name {
            self.record_definition(node)?;
        }

        let defining_position =
            matches!(parent_kind, Kind::Definition | Kind::Declaration) && position == 0;
        if child_kind.props().is_reference && !defining_position {
            let scope = self.ast.node(node).scope;
            self.ast.scope_mut(scope).references.push(node);
        }

        if child_kind == Kind::Import {
            self.record_import_source(node);
        }

        self.update_completion(into);
        Ok(())
    }

    fn update_completion(&mut self, id: NodeId) {
        let node = self.ast.node(id);
        let props = node.kind.props();
        if props.open || node.complete {
            return;
        }

        let complete = match node.kind {
            // A function literal runs until its body block.
            Kind::FunctionLiteral => node
                .children
                .last()
                .map(|&child| self.ast.node(child).kind == Kind::Block)
                .unwrap_or(false),
            Kind::FunctionSignature | Kind::FunctionPointer => node.children.len() >= 2,
            kind => node.children.len() >= kind.expected_child_count(),
        };

        if complete {
            self.ast.node_mut(id).complete = true;
        }
    }

    /// Records the definition introduced by a definition/declaration node.
    /// Runs at `place`, when both the name and the value subtree are final.
    fn record_definition(&mut self, def_node: NodeId) -> Result<(), CompileError> {
        let scope = self.ast.node(def_node).scope;
        let children = self.ast.node(def_node).children.clone();
        let (name_node, value_node) = match (children.first(), children.get(1)) {
            (Some(&name), Some(&value)) => (name, value),
            _ => panic!("definition placed before both operands were parsed"),
        };

        let name = self.ast.node(name_node).text().to_string();
        let parent_kind = self
            .ast
            .node(def_node)
            .parent
            .map(|p| self.ast.node(p).kind);
        let imported = parent_kind == Some(Kind::Import);
        let is_param = parent_kind == Some(Kind::ParameterList);
        let global = self.ast.scope(scope).is_global();

        let value_kind = self.ast.node(value_node).kind;
        let mut def = Definition {
            kind: DefKind::Global,
            name,
            token: self.ast.node(name_node).token.clone(),
            run_type: RunType::Void,
            return_type: RunType::Void,
            mutable: true,
            scope,
            index: 0,
            import_source: None,
            export_name: None,
            initializer: None,
            signature_index: None,
            param_types: vec![],
            storage: None,
            limits: None,
            body: None,
            is_param,
        };

        match value_kind {
            Kind::TypeName => {
                def.run_type = self.plain_run_type(value_node)?;
            }
            Kind::Immutable => {
                let inner = self.ast.node(value_node).children[0];
                def.run_type = self.plain_run_type(inner)?;
                def.mutable = false;
            }
            Kind::Pointer => {
                let inner = self.ast.node(value_node).children[0];
                let storage = match Storage::parse(self.ast.node(inner).text()) {
                    Some(storage) => storage,
                    None => {
                        return Err(self.error_at(ErrorKind::ChildTypeConstraintViolation, inner))
                    }
                };
                // The pointer variable itself holds a 32-bit element index.
                def.run_type = RunType::I32;
                def.storage = Some(storage);
            }
            Kind::FunctionLiteral | Kind::FunctionSignature => {
                let (params, ret) = self.signature_of(value_node)?;
                def.kind = DefKind::Function;
                def.run_type = ret;
                def.return_type = ret;
                def.mutable = false;
                def.signature_index = Some(self.ast.intern_signature(params.clone(), ret));
                def.param_types = params;
                if value_kind == Kind::FunctionLiteral {
                    def.body = Some(value_node);
                }
            }
            Kind::FunctionPointer => {
                let (params, ret) = self.signature_of(value_node)?;
                def.run_type = RunType::I32;
                def.signature_index = Some(self.ast.intern_signature(params.clone(), ret));
                def.param_types = params;
                def.return_type = ret;
            }
            Kind::DefaultMemory => {
                if self.ast.globals.memory.is_some() {
                    return Err(self.error_at(ErrorKind::DuplicateDefaultMemory, def_node));
                }
                def.kind = DefKind::Memory;
                def.mutable = false;
            }
            Kind::DefaultTable => {
                if self.ast.globals.table.is_some() {
                    return Err(self.error_at(ErrorKind::DuplicateDefaultTable, def_node));
                }
                def.kind = DefKind::Table;
                def.mutable = false;
            }
            _ => return Err(self.error_at(ErrorKind::ChildTypeConstraintViolation, value_node)),
        }

        let def_kind = def.kind;
        if def_kind == DefKind::Function && !global && !imported {
            return Err(self.error_at(ErrorKind::BadFunctionPlacement, def_node));
        }

        let id = self.ast.alloc_def(def);
        self.ast.node_mut(def_node).definition = Some(id);

        match def_kind {
            DefKind::Memory => self.ast.globals.memory = Some(id),
            DefKind::Table => self.ast.globals.table = Some(id),
            _ => {}
        }

        if imported {
            self.ast.globals.imports.push(id);
        } else {
            match def_kind {
                DefKind::Function => self.ast.globals.functions.push(id),
                DefKind::Global => {
                    if global {
                        self.ast.globals.variables.push(id);
                    } else if let Some(function) = self.ast.enclosing_function_scope(scope) {
                        if is_param {
                            self.ast.scope_mut(function).params.push(id);
                        } else {
                            self.ast.scope_mut(function).locals.push(id);
                        }
                    }
                }
                DefKind::Memory | DefKind::Table => {}
            }
        }

        Ok(())
    }

    /// Param types and return type of a function literal, signature or
    /// function pointer node.
    fn signature_of(&self, node: NodeId) -> Result<(Vec<RunType>, RunType), CompileError> {
        let children = self.ast.node(node).children.clone();
        let mut params = vec![];
        let mut ret = RunType::Void;

        for child in children {
            match self.ast.node(child).kind {
                Kind::ParameterList => {
                    for &decl in &self.ast.node(child).children {
                        let def = match self.ast.node(decl).definition {
                            Some(def) => def,
                            None => panic!("parameter declaration without a definition"),
                        };
                        params.push(self.ast.def(def).run_type);
                    }
                }
                Kind::TypeList => {
                    for &name in &self.ast.node(child).children {
                        params.push(self.plain_run_type(name)?);
                    }
                }
                Kind::TypeName => ret = self.plain_run_type(child)?,
                Kind::Block => {}
                _ => {}
            }
        }

        Ok((params, ret))
    }

    /// Value type of a type-name node; the storage-suffixed forms are only
    /// meaningful under `ptr`.
    fn plain_run_type(&self, node: NodeId) -> Result<RunType, CompileError> {
        RunType::from_type_name(self.ast.node(node).text())
            .ok_or_else(|| self.error_at(ErrorKind::ChildTypeConstraintViolation, node))
    }

    /// Copies the import's source string onto the imported definition.
    fn record_import_source(&mut self, import_node: NodeId) {
        let children = self.ast.node(import_node).children.clone();
        if let (Some(&decl), Some(&source)) = (children.first(), children.get(1)) {
            let text = string_value(self.ast.node(source).text());
            if let Some(def) = self.ast.node(decl).definition {
                self.ast.def_mut(def).import_source = Some(text);
            }
        }
    }

    fn error_at(&self, kind: ErrorKind, node: NodeId) -> CompileError {
        match &self.ast.node(node).token {
            Some(token) => CompileError::at(kind, token),
            None => CompileError::new(kind),
        }
    }
}
