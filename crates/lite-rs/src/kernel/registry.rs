//! Kernel registry keyed by op type and place.
//!
//! Registration order is preserved per op type; selection relies on it as the
//! final tie-break, so iteration never goes through a hash map.

use super::{Kernel, KernelBinding};
use crate::place::Place;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

pub type KernelFactory = Arc<dyn Fn() -> Box<dyn Kernel> + Send + Sync>;

#[derive(Clone)]
pub struct KernelRegistration {
    pub op_type: String,
    pub alias: String,
    pub place: Place,
    /// Higher wins among kernels that match the same place exactly.
    pub priority: i32,
    /// Source file that provided the kernel, written to tailoring lists.
    pub source: String,
    factory: KernelFactory,
}

impl KernelRegistration {
    pub fn new<F>(op_type: impl Into<String>, place: Place, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Kernel> + Send + Sync + 'static,
    {
        KernelRegistration {
            op_type: op_type.into(),
            alias: "def".to_string(),
            place,
            priority: 0,
            source: String::new(),
            factory: Arc::new(factory),
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn binding(&self) -> KernelBinding {
        KernelBinding {
            op_type: self.op_type.clone(),
            alias: self.alias.clone(),
            place: self.place,
        }
    }

    pub fn create(&self) -> Box<dyn Kernel> {
        (self.factory)()
    }
}

impl fmt::Debug for KernelRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelRegistration")
            .field("op_type", &self.op_type)
            .field("alias", &self.alias)
            .field("place", &self.place)
            .field("priority", &self.priority)
            .field("source", &self.source)
            .finish()
    }
}

#[derive(Default)]
pub struct KernelRegistry {
    by_op: RwLock<HashMap<String, Vec<Arc<KernelRegistration>>>>,
}

impl fmt::Debug for KernelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelRegistry")
            .field("kernels", &self.len())
            .finish()
    }
}

static GLOBAL_KERNELS: Lazy<Arc<KernelRegistry>> = Lazy::new(|| Arc::new(KernelRegistry::new()));

impl KernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry that linked backends populate.
    pub fn global() -> Arc<KernelRegistry> {
        Arc::clone(&GLOBAL_KERNELS)
    }

    /// Appends a registration. A second registration with the same
    /// `(op_type, alias, place)` is ignored so backend registrars can run twice.
    pub fn register(&self, registration: KernelRegistration) -> bool {
        let mut by_op = self.by_op.write().unwrap_or_else(PoisonError::into_inner);
        let entries = by_op.entry(registration.op_type.clone()).or_default();
        if entries
            .iter()
            .any(|e| e.alias == registration.alias && e.place == registration.place)
        {
            return false;
        }
        entries.push(Arc::new(registration));
        true
    }

    /// Registrations for `op_type` in registration order.
    pub fn kernels_for(&self, op_type: &str) -> Vec<Arc<KernelRegistration>> {
        self.by_op
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(op_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Looks up the registration a binding refers to.
    pub fn find(&self, binding: &KernelBinding) -> Option<Arc<KernelRegistration>> {
        self.kernels_for(&binding.op_type)
            .into_iter()
            .find(|r| r.alias == binding.alias && r.place == binding.place)
    }

    pub fn has_op(&self, op_type: &str) -> bool {
        !self.kernels_for(op_type).is_empty()
    }

    pub fn op_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .by_op
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.by_op
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
