//! Name → pass lookup used to resolve string schedules.

use std::sync::Arc;

use crate::{
    AutoContiguous, DeadCodeElimination, EliminateCommonSubexpression, EliminateConvert,
    EliminateIdentity, EliminatePad, Pass, PropagateConstant, RewriteGelu, RewriteLayernorm,
    RewriteQuantization, SimplifyAlgebra,
};

/// Registry of available passes, keyed by [`Pass::name`].
#[derive(Debug)]
pub struct PassRegistry {
    passes: Vec<Arc<dyn Pass>>,
}

impl Default for PassRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PassRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// Creates a registry pre-populated with the built-in passes.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register(Box::new(DeadCodeElimination::default()));
        reg.register(Box::new(AutoContiguous));
        reg.register(Box::new(EliminateConvert));
        reg.register(Box::new(EliminatePad));
        reg.register(Box::new(EliminateIdentity));
        reg.register(Box::new(EliminateCommonSubexpression));
        reg.register(Box::new(PropagateConstant));
        reg.register(Box::new(SimplifyAlgebra));
        reg.register(Box::new(RewriteQuantization));
        reg.register(Box::new(RewriteGelu));
        reg.register(Box::new(RewriteLayernorm));
        reg
    }

    /// Registers a pass, replacing any pass with the same name.
    pub fn register(&mut self, pass: Box<dyn Pass>) {
        self.passes.retain(|p| p.name() != pass.name());
        self.passes.push(Arc::from(pass));
    }

    pub fn find(&self, name: &str) -> Option<&dyn Pass> {
        self.passes
            .iter()
            .find(|p| p.name() == name)
            .map(|p| p.as_ref())
    }

    pub(crate) fn get(&self, name: &str) -> Option<Arc<dyn Pass>> {
        self.passes.iter().find(|p| p.name() == name).cloned()
    }

    /// Lists all registered pass names, in registration order.
    pub fn list(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name()).collect()
    }
}
