//! Name resolution.
//!
//! Walks the scope tree depth first. Within each scope, every definition is
//! inserted into the name table (duplicates fail), then each recorded
//! reference is bound to a definition found by walking the scope chain
//! upward, so inner scopes inherit the names of their ancestors.

use crate::errors::{CompileError, ErrorKind};
use crate::syntax::{Ast, DefId, DefKind, Kind, NodeId, ScopeId};

#[derive(Debug, Default)]
pub struct Resolver {}

impl Resolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&self, ast: &mut Ast) -> Result<(), CompileError> {
        self.resolve_scope(ast, ast.global_scope())
    }

    fn resolve_scope(&self, ast: &mut Ast, scope: ScopeId) -> Result<(), CompileError> {
        for def_id in ast.scope(scope).definitions.clone() {
            let name = ast.def(def_id).name.clone();
            if ast.scope(scope).names.contains_key(&name) {
                return Err(match &ast.def(def_id).token {
                    Some(token) => CompileError::at(ErrorKind::DuplicateDefinition, token),
                    None => CompileError::new(ErrorKind::DuplicateDefinition),
                });
            }
            ast.scope_mut(scope).names.insert(name, def_id);
        }

        for node_id in ast.scope(scope).references.clone() {
            self.bind_reference(ast, scope, node_id)?;
        }

        for child in ast.scope(scope).children.clone() {
            self.resolve_scope(ast, child)?;
        }

        Ok(())
    }

    fn bind_reference(
        &self,
        ast: &mut Ast,
        scope: ScopeId,
        node_id: NodeId,
    ) -> Result<(), CompileError> {
        let name = ast.node(node_id).text().to_string();
        let parent_kind = ast
            .node(node_id)
            .parent
            .map(|parent| ast.node(parent).kind);
        // Export targets name things that ordinary expressions cannot.
        let under_export = matches!(parent_kind, Some(Kind::Export) | Some(Kind::AsRename));

        let def_id = match lookup(ast, scope, &name) {
            Some(def_id) => def_id,
            None if under_export => {
                return Err(self.error(ast, ErrorKind::NonExistentExport, node_id))
            }
            None => return Err(self.error(ast, ErrorKind::UnresolvableReference, node_id)),
        };

        if !under_export {
            let def = ast.def(def_id);
            let ok = match ast.node(node_id).kind {
                // A plain variable reference cannot name a function, memory
                // or table.
                Kind::Variable => def.kind == DefKind::Global,
                Kind::Call => def.kind == DefKind::Function || def.is_function_pointer(),
                Kind::MemoryAccess => def.is_pointer(),
                _ => true,
            };
            if !ok {
                return Err(self.error(ast, ErrorKind::BadReferenceKind, node_id));
            }
        }

        ast.node_mut(node_id).definition = Some(def_id);
        Ok(())
    }

    fn error(&self, ast: &Ast, kind: ErrorKind, node: NodeId) -> CompileError {
        match &ast.node(node).token {
            Some(token) => CompileError::at(kind, token),
            None => CompileError::new(kind),
        }
    }
}

fn lookup(ast: &Ast, scope: ScopeId, name: &str) -> Option<DefId> {
    let mut current = Some(scope);
    while let Some(id) = current {
        if let Some(&def) = ast.scope(id).names.get(name) {
            return Some(def);
        }
        current = ast.scope(id).parent;
    }
    None
}
