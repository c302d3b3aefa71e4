//! Forwards users of `identity` to its input.

use tgraph_ir::{InstructionRef, IrError, Module, Operator};

use crate::Pass;

/// Redirects every user of an `identity` instruction to the identity's input.
///
/// The final instruction of a module without `@return` is left alone since
/// it is the module's output. Orphaned identities are left for dead-code
/// elimination.
#[derive(Debug)]
pub struct EliminateIdentity;

impl Pass for EliminateIdentity {
    fn name(&self) -> &str {
        "eliminate_identity"
    }

    fn run(&self, module: &mut Module) -> Result<bool, IrError> {
        let order: Vec<InstructionRef> = module.iter().collect();
        let last = module.last();
        let mut changed = false;
        for ins in order {
            let node = &module[ins];
            if !matches!(node.op(), Operator::Identity)
                || Some(ins) == last
                || node.outputs().is_empty()
            {
                continue;
            }
            let &[input] = node.inputs() else {
                continue;
            };
            module.replace_instruction_with(ins, input)?;
            changed = true;
        }
        Ok(changed)
    }
}
