//! Programs: a main module plus named sub-modules.

use std::collections::HashMap;
use std::ops::{Index, IndexMut};

use crate::arena::Arena;
use crate::error::IrError;
use crate::instruction::InstructionRef;
use crate::module::{Module, ModuleRef};
use crate::operator::Operator;

/// Name of the entry module.
pub const MAIN_MODULE: &str = "main";

/// Owns every module of a compilation unit.
///
/// Modules refer to each other only through the `module_args` of control-flow
/// instructions, as [`ModuleRef`] handles into this table. A module cannot be
/// removed while such a reference exists.
#[derive(Clone, Debug)]
pub struct Program {
    modules: Arena<Module>,
    names: HashMap<String, ModuleRef>,
    main: ModuleRef,
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

impl Program {
    /// A program with an empty `main` module.
    pub fn new() -> Self {
        let mut modules = Arena::new();
        let main = modules.append(Module::new(MAIN_MODULE));
        let names = HashMap::from([(MAIN_MODULE.to_owned(), main)]);
        Self {
            modules,
            names,
            main,
        }
    }

    pub fn main(&self) -> ModuleRef {
        self.main
    }

    pub fn main_module(&self) -> &Module {
        &self.modules[self.main]
    }

    pub fn main_module_mut(&mut self) -> &mut Module {
        &mut self.modules[self.main]
    }

    /// Creates an empty module with a unique name.
    pub fn create_module(&mut self, name: impl Into<String>) -> Result<ModuleRef, IrError> {
        let name = name.into();
        if self.names.contains_key(&name) {
            return Err(IrError::DuplicateModule(name));
        }
        let m = self.modules.append(Module::new(name.clone()));
        self.names.insert(name, m);
        Ok(m)
    }

    pub fn get_module(&self, name: &str) -> Option<ModuleRef> {
        self.names.get(name).copied()
    }

    pub fn try_module(&self, m: ModuleRef) -> Option<&Module> {
        self.modules.try_get(m)
    }

    /// Number of modules, `main` included.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Module handles in creation order.
    pub fn modules(&self) -> impl Iterator<Item = ModuleRef> + '_ {
        self.modules.iter().map(|(m, _)| m)
    }

    /// Removes a module that no instruction references.
    pub fn remove_module(&mut self, m: ModuleRef) -> Result<Module, IrError> {
        let name = self
            .modules
            .try_get(m)
            .map(|module| module.name().to_owned())
            .ok_or_else(|| IrError::UnknownModule(format!("{m:?}")))?;
        if m == self.main {
            return Err(IrError::ModuleInUse {
                module: name,
                user: "<program entry>".into(),
            });
        }
        if let Some((_, user)) = self
            .modules
            .iter()
            .find(|(_, module)| module.sub_modules().contains(&m))
        {
            return Err(IrError::ModuleInUse {
                module: name,
                user: user.name().to_owned(),
            });
        }
        self.names.remove(&name);
        self.modules
            .remove(m)
            .ok_or_else(|| IrError::UnknownModule(name))
    }

    /// Inserts a control-flow instruction referring to `module_args`.
    ///
    /// Inserts before `before`, or appends when `before` is `None`. The
    /// sub-modules' current output shapes feed the operator's shape rule.
    /// A module may not reference itself or any module that already reaches it.
    pub fn insert_instruction_with_modules(
        &mut self,
        module: ModuleRef,
        before: Option<InstructionRef>,
        op: Operator,
        inputs: impl Into<Vec<InstructionRef>>,
        module_args: impl Into<Vec<ModuleRef>>,
    ) -> Result<InstructionRef, IrError> {
        let module_args = module_args.into();
        let owner = self
            .modules
            .try_get(module)
            .ok_or_else(|| IrError::UnknownModule(format!("{module:?}")))?
            .name()
            .to_owned();
        let mut outputs = Vec::with_capacity(module_args.len());
        for &sub in &module_args {
            let sub_module = self
                .modules
                .try_get(sub)
                .ok_or_else(|| IrError::UnknownModule(format!("{sub:?}")))?;
            if self.reaches(sub, module) {
                return Err(IrError::RecursiveModule {
                    module: sub_module.name().to_owned(),
                    user: owner,
                });
            }
            outputs.push(sub_module.get_output_shapes());
        }
        self.modules[module].insert_with_modules(before, op, inputs.into(), module_args, outputs)
    }

    /// Modules reachable from `main` through control-flow instructions,
    /// each listed after all modules it references.
    pub fn reachable_modules(&self) -> Vec<ModuleRef> {
        let mut order = Vec::new();
        self.post_order(self.main, &mut order);
        order
    }

    fn post_order(&self, m: ModuleRef, order: &mut Vec<ModuleRef>) {
        if order.contains(&m) {
            return;
        }
        if let Some(module) = self.modules.try_get(m) {
            for sub in module.sub_modules() {
                self.post_order(sub, order);
            }
            order.push(m);
        }
    }

    /// Returns `true` if `from` is `to` or references it transitively.
    fn reaches(&self, from: ModuleRef, to: ModuleRef) -> bool {
        if from == to {
            return true;
        }
        self.modules
            .try_get(from)
            .is_some_and(|m| m.sub_modules().into_iter().any(|sub| self.reaches(sub, to)))
    }
}

impl Index<ModuleRef> for Program {
    type Output = Module;

    fn index(&self, m: ModuleRef) -> &Module {
        &self.modules[m]
    }
}

impl IndexMut<ModuleRef> for Program {
    fn index_mut(&mut self, m: ModuleRef) -> &mut Module {
        &mut self.modules[m]
    }
}
