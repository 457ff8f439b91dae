//! Arena-backed syntax tree.
//!
//! Nodes, scopes and definitions live in flat vectors owned by [`Ast`] and
//! refer to each other through index newtypes. The parser reassigns a node's
//! `parent` while reparenting; child linkage is only committed when a node is
//! placed, which keeps the partially-constructed tree explicit.

use super::grammar::Kind;
use super::tokenizer::Token;
use crate::sem::RunType;
use std::collections::HashMap;
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DefId(pub u32);

/// Operator selection attached by the validator: the opcode to emit and the
/// type the operation leaves on the stack.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpSelection {
    pub opcode: crate::asm::wasm::Opcode,
    pub result: RunType,
}

/// Parsed literal payload. Integers keep their unsigned magnitude; a unary
/// negate applies the sign at emission time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal {
    Int(u64),
    Float(f64),
}

#[derive(Debug)]
pub struct Node {
    pub kind: Kind,
    pub token: Option<Token>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub scope: ScopeId,
    pub complete: bool,

    // Validator results.
    pub run_type: RunType,
    pub always_escapes: bool,
    pub drop_value: bool,

    // Kind-specific metadata.
    pub definition: Option<DefId>,
    pub operator: Option<OpSelection>,
    pub temp_local: Option<DefId>,
    pub loop_target: Option<NodeId>,
    pub literal: Option<Literal>,
}

impl Node {
    fn new(kind: Kind, token: Option<Token>, parent: Option<NodeId>, scope: ScopeId) -> Self {
        Self {
            kind,
            token,
            parent,
            children: vec![],
            scope,
            complete: false,
            run_type: RunType::Void,
            always_escapes: false,
            drop_value: false,
            definition: None,
            operator: None,
            temp_local: None,
            loop_target: None,
            literal: None,
        }
    }

    pub fn text(&self) -> &str {
        self.token.as_ref().map(|t| t.text.as_str()).unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefKind {
    Function,
    Global,
    Memory,
    Table,
}

/// Element type and width of a pointer's backing storage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Storage {
    pub element: RunType,
    /// Storage width in bytes: 1, 2, 4 or 8.
    pub size: u32,
    pub signed: bool,
    /// True when the storage is narrower than the element type, so loads
    /// need a sign/zero extension suffix.
    pub extended: bool,
}

impl Storage {
    /// Parses a pointer storage type of the form `i{32,64}[_{s,u}{8,16,32}]`.
    pub fn parse(text: &str) -> Option<Storage> {
        let (element, rest) = if let Some(rest) = text.strip_prefix("i32") {
            (RunType::I32, rest)
        } else if let Some(rest) = text.strip_prefix("i64") {
            (RunType::I64, rest)
        } else {
            return None;
        };

        let element_size = if element == RunType::I32 { 4 } else { 8 };
        let (size, signed) = match rest {
            "" => (element_size, true),
            "_s8" => (1, true),
            "_u8" => (1, false),
            "_s16" => (2, true),
            "_u16" => (2, false),
            "_s32" => (4, true),
            "_u32" => (4, false),
            _ => return None,
        };

        Some(Storage {
            element,
            size,
            signed,
            extended: size < element_size,
        })
    }
}

/// Uniform record for every named entity.
#[derive(Debug)]
pub struct Definition {
    pub kind: DefKind,
    pub name: String,
    /// The name token, kept for error reporting.
    pub token: Option<Token>,
    pub run_type: RunType,
    pub return_type: RunType,
    pub mutable: bool,
    pub scope: ScopeId,
    /// Position in the target index space, assigned during emission.
    pub index: u32,
    pub import_source: Option<String>,
    pub export_name: Option<String>,
    pub initializer: Option<NodeId>,
    pub signature_index: Option<u32>,
    pub param_types: Vec<RunType>,
    pub storage: Option<Storage>,
    /// Memory/table size limits, parsed by the validator.
    pub limits: Option<(u32, Option<u32>)>,
    /// The function literal node carrying the body.
    pub body: Option<NodeId>,
    pub is_param: bool,
}

impl Definition {
    pub fn is_imported(&self) -> bool {
        self.import_source.is_some()
    }

    pub fn is_function_pointer(&self) -> bool {
        self.kind == DefKind::Global && self.signature_index.is_some()
    }

    pub fn is_pointer(&self) -> bool {
        self.storage.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Global,
    Function,
    Block,
    Loop,
}

#[derive(Debug)]
pub struct Scope {
    pub kind: ScopeKind,
    pub parent: Option<ScopeId>,
    pub children: Vec<ScopeId>,
    pub names: HashMap<String, DefId>,
    pub definitions: Vec<DefId>,
    pub references: Vec<NodeId>,

    // Function scopes track the local index space.
    pub params: Vec<DefId>,
    pub locals: Vec<DefId>,
    pub temps: Vec<DefId>,
}

impl Scope {
    fn new(kind: ScopeKind, parent: Option<ScopeId>) -> Self {
        Self {
            kind,
            parent,
            children: vec![],
            names: HashMap::new(),
            definitions: vec![],
            references: vec![],
            params: vec![],
            locals: vec![],
            temps: vec![],
        }
    }

    pub fn is_global(&self) -> bool {
        self.kind == ScopeKind::Global
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncSignature {
    pub params: Vec<RunType>,
    pub ret: RunType,
}

/// Tables owned by the root scope and shared by every nested scope.
#[derive(Debug, Default)]
pub struct GlobalTables {
    pub signatures: Vec<FuncSignature>,
    signature_memo: HashMap<String, u32>,
    /// Imported definitions in declaration order; this order fixes the
    /// imported part of each index space.
    pub imports: Vec<DefId>,
    /// Non-imported functions in declaration order.
    pub functions: Vec<DefId>,
    /// Non-imported globals in declaration order.
    pub variables: Vec<DefId>,
    pub memory: Option<DefId>,
    pub table: Option<DefId>,
    /// `(definition, wire name)` pairs recorded by the validator.
    pub exports: Vec<(DefId, String)>,
}

#[derive(Debug)]
pub struct Ast {
    pub nodes: Vec<Node>,
    pub scopes: Vec<Scope>,
    pub defs: Vec<Definition>,
    pub globals: GlobalTables,
    pub root: NodeId,
}

impl Ast {
    pub fn new() -> Self {
        let mut ast = Self {
            nodes: vec![],
            scopes: vec![Scope::new(ScopeKind::Global, None)],
            defs: vec![],
            globals: GlobalTables::default(),
            root: NodeId(0),
        };
        ast.root = ast.alloc_node(Kind::Root, None, None, ScopeId(0));
        ast
    }

    pub fn global_scope(&self) -> ScopeId {
        ScopeId(0)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0 as usize]
    }

    pub fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0 as usize]
    }

    pub fn def(&self, id: DefId) -> &Definition {
        &self.defs[id.0 as usize]
    }

    pub fn def_mut(&mut self, id: DefId) -> &mut Definition {
        &mut self.defs[id.0 as usize]
    }

    pub fn alloc_node(
        &mut self,
        kind: Kind,
        token: Option<Token>,
        parent: Option<NodeId>,
        scope: ScopeId,
    ) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node::new(kind, token, parent, scope));
        id
    }

    pub fn alloc_scope(&mut self, kind: ScopeKind, parent: ScopeId) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope::new(kind, Some(parent)));
        self.scope_mut(parent).children.push(id);
        id
    }

    pub fn alloc_def(&mut self, def: Definition) -> DefId {
        let id = DefId(self.defs.len() as u32);
        let scope = def.scope;
        self.defs.push(def);
        self.scope_mut(scope).definitions.push(id);
        id
    }

    /// Interns a function signature, memoized by a composed key.
    pub fn intern_signature(&mut self, params: Vec<RunType>, ret: RunType) -> u32 {
        let mut key = String::new();
        for param in &params {
            let _ = write!(key, "{},", param);
        }
        let _ = write!(key, "->{}", ret);

        if let Some(&index) = self.globals.signature_memo.get(&key) {
            return index;
        }

        let index = self.globals.signatures.len() as u32;
        self.globals.signatures.push(FuncSignature { params, ret });
        self.globals.signature_memo.insert(key, index);
        index
    }

    /// Innermost function scope enclosing `scope`, if any.
    pub fn enclosing_function_scope(&self, scope: ScopeId) -> Option<ScopeId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            if self.scope(id).kind == ScopeKind::Function {
                return Some(id);
            }
            current = self.scope(id).parent;
        }
        None
    }

    /// Innermost `loop` node enclosing `node`, if any.
    pub fn enclosing_loop(&self, node: NodeId) -> Option<NodeId> {
        let mut current = self.node(node).parent;
        while let Some(id) = current {
            if self.node(id).kind == Kind::Loop {
                return Some(id);
            }
            current = self.node(id).parent;
        }
        None
    }

    /// Indented tree dump used by tooling.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        self.dump_node(self.root, 0, &mut out);
        out
    }

    fn dump_node(&self, id: NodeId, indent: usize, out: &mut String) {
        let node = self.node(id);
        let _ = writeln!(
            out,
            "{:indent$}{:?} `{}` {}",
            "",
            node.kind,
            node.text(),
            node.run_type,
            indent = indent
        );
        for &child in &node.children {
            self.dump_node(child, indent + 2, out);
        }
    }
}
