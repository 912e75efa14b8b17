//! Hierarchical variable store.
//!
//! A [`Scope`] maps names to [`Variable`] handles and holds a non-owning link
//! to its parent. Lookups walk the parent chain; creation always happens in the
//! scope the call is made on. The parent is fixed at construction, so a scope
//! can never become its own ancestor.

use crate::graph::VarKind;
use crate::variable::Variable;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};

#[derive(Debug, Default)]
pub struct Scope {
    vars: RwLock<BTreeMap<String, Variable>>,
    parent: Option<Weak<Scope>>,
}

impl Scope {
    /// Creates a scope with no parent.
    pub fn new_root() -> Arc<Scope> {
        Arc::new(Scope::default())
    }

    /// Creates a child of `parent`. The child does not keep the parent alive.
    pub fn new_child(parent: &Arc<Scope>) -> Arc<Scope> {
        Arc::new(Scope {
            vars: RwLock::new(BTreeMap::new()),
            parent: Some(Arc::downgrade(parent)),
        })
    }

    /// Returns the parent scope if it is still alive.
    pub fn parent(&self) -> Option<Arc<Scope>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Returns the variable visible under `name`, creating it locally when no
    /// scope in the chain has it.
    pub fn var(&self, name: &str) -> Variable {
        if let Some(found) = self.find_var(name) {
            return found;
        }
        self.local_var(name)
    }

    /// Creates or returns a tensor variable in this scope only, shadowing any
    /// ancestor entry of the same name.
    pub fn local_var(&self, name: &str) -> Variable {
        self.local_var_with(name, VarKind::LodTensor)
    }

    /// Like [`Scope::local_var`], choosing the payload kind for new entries.
    pub fn local_var_with(&self, name: &str, kind: VarKind) -> Variable {
        let mut vars = self.vars.write().unwrap_or_else(PoisonError::into_inner);
        vars.entry(name.to_string())
            .or_insert_with(|| match kind {
                VarKind::LodTensor => Variable::default(),
                VarKind::TensorArray => Variable::tensor_array(),
            })
            .clone()
    }

    /// Binds an existing handle under `name` in this scope, replacing any local entry.
    pub fn insert_local(&self, name: &str, var: Variable) {
        let mut vars = self.vars.write().unwrap_or_else(PoisonError::into_inner);
        vars.insert(name.to_string(), var);
    }

    pub fn find_local_var(&self, name: &str) -> Option<Variable> {
        let vars = self.vars.read().unwrap_or_else(PoisonError::into_inner);
        vars.get(name).cloned()
    }

    /// Resolves `name` in this scope, then in each ancestor.
    pub fn find_var(&self, name: &str) -> Option<Variable> {
        if let Some(found) = self.find_local_var(name) {
            return Some(found);
        }
        let mut current = self.parent();
        while let Some(scope) = current {
            if let Some(found) = scope.find_local_var(name) {
                return Some(found);
            }
            current = scope.parent();
        }
        None
    }

    /// Removes local entries. Handles shared elsewhere stay alive.
    pub fn erase<S: AsRef<str>>(&self, names: &[S]) {
        let mut vars = self.vars.write().unwrap_or_else(PoisonError::into_inner);
        for name in names {
            vars.remove(name.as_ref());
        }
    }

    /// Sorted names of the variables owned by this scope.
    pub fn local_var_names(&self) -> Vec<String> {
        let vars = self.vars.read().unwrap_or_else(PoisonError::into_inner);
        vars.keys().cloned().collect()
    }

    pub fn contains_local(&self, name: &str) -> bool {
        let vars = self.vars.read().unwrap_or_else(PoisonError::into_inner);
        vars.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{DType, Tensor};

    #[test]
    fn var_resolves_through_parent_before_creating() {
        let root = Scope::new_root();
        let weight = root.var("w");
        weight.set_tensor(Tensor::zeros([2], DType::F32));

        let child = Scope::new_child(&root);
        assert!(child.var("w").ptr_eq(&weight));
        assert!(!child.contains_local("w"));

        let fresh = child.var("tmp");
        assert!(child.contains_local("tmp"));
        assert!(root.find_var("tmp").is_none());
        assert!(child.find_var("tmp").unwrap().ptr_eq(&fresh));
    }

    #[test]
    fn local_var_shadows_ancestor() {
        let root = Scope::new_root();
        let shared = root.var("w");
        let child = Scope::new_child(&root);
        let private = child.local_var("w");
        assert!(!private.ptr_eq(&shared));
        assert!(child.find_var("w").unwrap().ptr_eq(&private));
        assert!(root.find_var("w").unwrap().ptr_eq(&shared));
    }

    #[test]
    fn dropping_child_leaves_parent_entries_intact() {
        let root = Scope::new_root();
        root.var("w").set_tensor(Tensor::zeros([3], DType::F32));
        {
            let child = Scope::new_child(&root);
            child.local_var("scratch");
            assert!(child.parent().is_some());
        }
        assert_eq!(root.local_var_names(), vec!["w".to_string()]);
        assert_eq!(root.find_var("w").unwrap().tensor().unwrap().len(), 3);
    }

    #[test]
    fn erase_removes_only_local_entries() {
        let root = Scope::new_root();
        root.var("a");
        let child = Scope::new_child(&root);
        child.local_var("a");
        child.erase(&["a"]);
        assert!(!child.contains_local("a"));
        assert!(child.find_var("a").is_some());
    }
}
