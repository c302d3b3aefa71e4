//! Structured records for persisting modules and programs.
//!
//! A module is an ordered list of `{op, inputs, modules}` records where
//! `inputs` are indices of earlier records and `modules` are sub-module
//! names. Parameters and literals are ordinary records. Shapes are not
//! stored; they are re-derived on load.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::IrError;
use crate::instruction::InstructionRef;
use crate::module::{Module, ModuleRef};
use crate::operator::Operator;
use crate::program::{MAIN_MODULE, Program};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstructionRecord {
    pub op: Operator,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modules: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModuleRecord {
    pub name: String,
    pub instructions: Vec<InstructionRecord>,
}

/// Every module of a program, each after the modules it references.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgramRecord {
    pub modules: Vec<ModuleRecord>,
}

impl ModuleRecord {
    /// Records `module`, naming sub-modules with `resolve`.
    pub fn from_module(module: &Module, resolve: impl Fn(ModuleRef) -> String) -> Self {
        let index: HashMap<InstructionRef, usize> =
            module.iter().enumerate().map(|(i, ins)| (ins, i)).collect();
        let instructions = module
            .iter()
            .map(|ins| {
                let node = &module[ins];
                InstructionRecord {
                    op: node.op().clone(),
                    inputs: node.inputs().iter().map(|i| index[i]).collect(),
                    modules: node.module_args().iter().map(|&m| resolve(m)).collect(),
                }
            })
            .collect();
        Self {
            name: module.name().to_owned(),
            instructions,
        }
    }

    /// Rebuilds a standalone module. Records that reference sub-modules
    /// must be loaded through [`ProgramRecord::to_program`].
    pub fn to_module(&self) -> Result<Module, IrError> {
        let mut module = Module::new(self.name.clone());
        let mut handles = Vec::with_capacity(self.instructions.len());
        for (i, record) in self.instructions.iter().enumerate() {
            if !record.modules.is_empty() {
                return Err(IrError::InvalidRecord(format!(
                    "instruction {i} of `{}` references sub-modules",
                    self.name
                )));
            }
            let inputs = resolve_inputs(&self.name, i, &record.inputs, &handles)?;
            handles.push(module.add_instruction(record.op.clone(), inputs)?);
        }
        Ok(module)
    }
}

impl ProgramRecord {
    pub fn from_program(program: &Program) -> Self {
        let resolve = |m: ModuleRef| {
            program
                .try_module(m)
                .map_or_else(|| format!("{m:?}"), |module| module.name().to_owned())
        };
        let modules = program
            .reachable_modules()
            .into_iter()
            .map(|m| ModuleRecord::from_module(&program[m], resolve))
            .collect();
        Self { modules }
    }

    /// Rebuilds a program; sub-modules must precede the modules using them.
    pub fn to_program(&self) -> Result<Program, IrError> {
        let mut program = Program::new();
        for record in &self.modules {
            let m = if record.name == MAIN_MODULE {
                program.main()
            } else {
                program.create_module(record.name.clone())?
            };
            let mut handles = Vec::with_capacity(record.instructions.len());
            for (i, ins) in record.instructions.iter().enumerate() {
                let inputs = resolve_inputs(&record.name, i, &ins.inputs, &handles)?;
                let subs = ins
                    .modules
                    .iter()
                    .map(|name| {
                        program
                            .get_module(name)
                            .ok_or_else(|| IrError::UnknownModule(name.clone()))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let handle = program.insert_instruction_with_modules(
                    m,
                    None,
                    ins.op.clone(),
                    inputs,
                    subs,
                )?;
                handles.push(handle);
            }
        }
        Ok(program)
    }
}

fn resolve_inputs(
    module: &str,
    at: usize,
    inputs: &[usize],
    handles: &[InstructionRef],
) -> Result<Vec<InstructionRef>, IrError> {
    inputs
        .iter()
        .map(|&i| {
            handles.get(i).copied().ok_or_else(|| {
                IrError::InvalidRecord(format!(
                    "instruction {at} of `{module}` uses record {i}, which is not defined before it"
                ))
            })
        })
        .collect()
}

impl Program {
    pub fn to_record(&self) -> ProgramRecord {
        ProgramRecord::from_program(self)
    }

    pub fn from_record(record: &ProgramRecord) -> Result<Self, IrError> {
        record.to_program()
    }
}
