//! Graph rewriting for tgraph.
//!
//! Provides a [`Pass`] trait, a [`PassManager`] that runs a schedule of
//! passes over every module of a program followed by dead-code elimination,
//! a [`PassRegistry`] resolving pass names, and the built-in passes.

mod auto_contiguous;
mod config;
mod cse;
mod dce;
mod eliminate_convert;
mod eliminate_identity;
mod eliminate_pad;
pub mod matcher;
mod propagate_constant;
mod registry;
mod rewrite_gelu;
mod rewrite_layernorm;
mod rewrite_quantization;
mod simplify_algebra;

pub use auto_contiguous::AutoContiguous;
pub use config::PipelineConfig;
pub use cse::EliminateCommonSubexpression;
pub use dce::{DeadCodeElimination, keep_when_empty};
pub use eliminate_convert::EliminateConvert;
pub use eliminate_identity::EliminateIdentity;
pub use eliminate_pad::EliminatePad;
pub use propagate_constant::PropagateConstant;
pub use registry::PassRegistry;
pub use rewrite_gelu::RewriteGelu;
pub use rewrite_layernorm::RewriteLayernorm;
pub use rewrite_quantization::RewriteQuantization;
pub use simplify_algebra::SimplifyAlgebra;

use std::fmt::Debug;
use std::sync::Arc;

use tgraph_ir::{InstructionRef, IrError, Module, Operator, Program, dump_module};

/// A transformation over one module.
pub trait Pass: Debug {
    /// Registry name of the pass.
    fn name(&self) -> &str;

    /// Runs the pass. Returns `true` if the module was modified.
    fn run(&self, module: &mut Module) -> Result<bool, IrError>;
}

/// Redirects the users of `old` to `new` without changing any cached shape.
///
/// When only the layout differs and `old` is standard, `new` is routed
/// through a `contiguous` first. Returns `false`, leaving the module
/// untouched, when no such replacement exists.
pub(crate) fn replace_keeping_shape(
    module: &mut Module,
    old: InstructionRef,
    new: InstructionRef,
) -> Result<bool, IrError> {
    let (want, have) = (module[old].shape(), module[new].shape());
    if want == have {
        module.replace_instruction_with(old, new)?;
        return Ok(true);
    }
    if !want.standard() || want.ty() != have.ty() || want.lens() != have.lens() {
        return Ok(false);
    }
    let packed = module.insert_instruction(old, Operator::Contiguous, vec![new])?;
    module.replace_instruction_with(old, packed)?;
    Ok(true)
}

/// Errors raised while building or running a pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PassError {
    #[error("unknown pass `{name}` (available: {})", available.join(", "))]
    UnknownPass { name: String, available: Vec<String> },

    #[error("pass `{pass}` failed on module `{module}`: {source}")]
    Ir {
        pass: String,
        module: String,
        #[source]
        source: IrError,
    },

    #[error("module is invalid after `{pass}`: {message}")]
    InvalidModule { pass: String, message: String },

    #[error("invalid pipeline configuration: {0}")]
    Config(#[from] serde_json::Error),
}

/// Optimization level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OptLevel {
    /// Only the final dead-code sweep.
    O0,
    /// Simplification: identities, converts, pads, algebra, constants.
    #[default]
    O1,
    /// O1 plus quantization, gelu and layernorm rewriting and CSE.
    O2,
}

impl OptLevel {
    /// Pass names scheduled at this level.
    pub fn schedule(self) -> &'static [&'static str] {
        match self {
            Self::O0 => &[],
            Self::O1 => &[
                "eliminate_identity",
                "eliminate_convert",
                "eliminate_pad",
                "simplify_algebra",
                "propagate_constant",
                "dead_code_elimination",
            ],
            Self::O2 => &[
                "rewrite_quantization",
                "rewrite_gelu",
                "rewrite_layernorm",
                "eliminate_identity",
                "eliminate_convert",
                "eliminate_pad",
                "simplify_algebra",
                "propagate_constant",
                "eliminate_common_subexpression",
                "dead_code_elimination",
                "auto_contiguous",
            ],
        }
    }
}

/// Runs a schedule of passes, each once, then a final dead-code sweep.
#[derive(Debug)]
pub struct PassManager {
    passes: Vec<Arc<dyn Pass>>,
    validate: bool,
    trace: bool,
    final_dce: bool,
}

impl Default for PassManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PassManager {
    /// An empty schedule with validation and the final sweep enabled.
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            validate: true,
            trace: false,
            final_dce: true,
        }
    }

    /// The built-in schedule for `level`.
    pub fn for_level(level: OptLevel) -> Self {
        let registry = PassRegistry::with_builtins();
        let mut pm = Self::new();
        pm.passes = level
            .schedule()
            .iter()
            .filter_map(|name| registry.get(name))
            .collect();
        pm
    }

    /// Resolves every pass named in `config` before anything runs.
    pub fn from_config(registry: &PassRegistry, config: &PipelineConfig) -> Result<Self, PassError> {
        let passes = config
            .passes
            .iter()
            .map(|name| {
                registry.get(name).ok_or_else(|| PassError::UnknownPass {
                    name: name.clone(),
                    available: registry.list().into_iter().map(str::to_owned).collect(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        log::info!(
            "resolved pipeline: [{}]",
            passes.iter().map(|p| p.name()).collect::<Vec<_>>().join(", ")
        );
        Ok(Self {
            passes,
            validate: config.validate,
            trace: config.trace,
            final_dce: config.final_dce,
        })
    }

    /// Appends a pass to the schedule.
    pub fn add_pass(&mut self, pass: Box<dyn Pass>) {
        self.passes.push(Arc::from(pass));
    }

    pub fn set_validate(&mut self, validate: bool) {
        self.validate = validate;
    }

    pub fn set_trace(&mut self, trace: bool) {
        self.trace = trace;
    }

    pub fn set_final_dce(&mut self, final_dce: bool) {
        self.final_dce = final_dce;
    }

    /// Names of the scheduled passes, in order.
    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Runs the schedule over every module reachable from `main`,
    /// sub-modules before the modules that use them.
    pub fn run(&self, program: &mut Program) -> Result<bool, PassError> {
        let modules = program.reachable_modules();
        let mut changed = false;
        for pass in &self.passes {
            for &m in &modules {
                changed |= self.run_pass(pass.as_ref(), &mut program[m])?;
            }
        }
        if self.final_dce {
            let dce = DeadCodeElimination::default();
            for &m in &modules {
                changed |= self.run_pass(&dce, &mut program[m])?;
            }
        }
        Ok(changed)
    }

    /// Runs the schedule over a single module.
    pub fn run_module(&self, module: &mut Module) -> Result<bool, PassError> {
        let mut changed = false;
        for pass in &self.passes {
            changed |= self.run_pass(pass.as_ref(), module)?;
        }
        if self.final_dce {
            changed |= self.run_pass(&DeadCodeElimination::default(), module)?;
        }
        Ok(changed)
    }

    fn run_pass(&self, pass: &dyn Pass, module: &mut Module) -> Result<bool, PassError> {
        let changed = pass.run(module).map_err(|source| PassError::Ir {
            pass: pass.name().to_owned(),
            module: module.name().to_owned(),
            source,
        })?;
        if changed {
            log::debug!("{}: `{}` changed the module", module.name(), pass.name());
        }
        if self.trace {
            log::trace!("after {}:\n{}", pass.name(), dump_module(module));
        }
        if self.validate {
            module.validate().map_err(|e| PassError::InvalidModule {
                pass: pass.name().to_owned(),
                message: e.to_string(),
            })?;
        }
        Ok(changed)
    }
}

/// Runs the built-in schedule for `level` over `program`.
pub fn optimize(program: &mut Program, level: OptLevel) -> Result<bool, PassError> {
    PassManager::for_level(level).run(program)
}
