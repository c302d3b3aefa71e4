//! Common subexpression elimination pass.
//!
//! Walks the module in order and merges each live instruction into an
//! earlier one with the same operator, inputs and sub-modules. After a merge
//! the surviving instruction's users are revisited, since they may have
//! become duplicates of each other. Dead duplicates are cleaned up by a
//! subsequent DCE pass.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};

use tgraph_ir::{InstructionRef, IrError, Module};

use crate::Pass;

#[derive(Debug)]
pub struct EliminateCommonSubexpression;

impl Pass for EliminateCommonSubexpression {
    fn name(&self) -> &str {
        "eliminate_common_subexpression"
    }

    fn run(&self, module: &mut Module) -> Result<bool, IrError> {
        let order: Vec<InstructionRef> = module.iter().collect();
        cse_range(module, &order)
    }
}

fn equivalent(module: &Module, a: InstructionRef, b: InstructionRef) -> bool {
    let (a, b) = (&module[a], &module[b]);
    a.op() == b.op() && a.inputs() == b.inputs() && a.module_args() == b.module_args()
}

/// Hash of everything [`equivalent`] compares.
fn fingerprint(module: &Module, ins: InstructionRef) -> u64 {
    let node = &module[ins];
    let mut h = DefaultHasher::new();
    node.op().hash(&mut h);
    node.inputs().hash(&mut h);
    node.module_args().hash(&mut h);
    h.finish()
}

fn cse_range(module: &mut Module, range: &[InstructionRef]) -> Result<bool, IrError> {
    let mut seen: HashMap<u64, Vec<InstructionRef>> = HashMap::new();
    let mut changed = false;
    for &ins in range {
        if !module.has_instruction(ins) || module[ins].outputs().is_empty() {
            continue;
        }
        let key = fingerprint(module, ins);
        let found = seen
            .get(&key)
            .and_then(|candidates| candidates.iter().copied().find(|&c| equivalent(module, c, ins)));
        match found {
            Some(eq) => {
                module.replace_instruction_with(ins, eq)?;
                changed = true;
                let mut users: Vec<InstructionRef> = module[eq].outputs().to_vec();
                users.sort_by_key(|&u| module.position(u));
                cse_range(module, &users)?;
            }
            None => seen.entry(key).or_default().push(ins),
        }
    }
    Ok(changed)
}
