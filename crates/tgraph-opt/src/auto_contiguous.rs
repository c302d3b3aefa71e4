//! Inserts `contiguous` where kernels need standard layouts.

use tgraph_ir::{InstructionRef, IrError, Module, Operator, Shape};

use crate::Pass;

/// Makes non-standard inputs of layout-sensitive operators contiguous.
///
/// Operators flagged `requires_standard_inputs` get a `contiguous` in front
/// of every input whose layout is transposed, broadcast or strided. Module
/// outputs with a non-standard layout are made contiguous as well.
#[derive(Debug)]
pub struct AutoContiguous;

impl Pass for AutoContiguous {
    fn name(&self) -> &str {
        "auto_contiguous"
    }

    fn run(&self, module: &mut Module) -> Result<bool, IrError> {
        let mut changed = false;
        let order: Vec<InstructionRef> = module.iter().collect();
        for ins in order {
            let node = &module[ins];
            if !node.op().attributes().requires_standard_inputs {
                continue;
            }
            let op = node.op().clone();
            let inputs = node.inputs().to_vec();
            if inputs.iter().all(|&i| is_standard(module[i].shape())) {
                continue;
            }
            let mut fixed = Vec::with_capacity(inputs.len());
            for input in inputs {
                if is_standard(module[input].shape()) {
                    fixed.push(input);
                } else {
                    fixed.push(module.insert_instruction(ins, Operator::Contiguous, vec![input])?);
                }
            }
            module.replace_instruction(ins, op, fixed)?;
            changed = true;
        }
        changed |= fix_outputs(module)?;
        Ok(changed)
    }
}

/// Tuples and dynamic shapes have no layout to fix.
fn is_standard(shape: &Shape) -> bool {
    shape.is_tuple() || shape.dynamic_shape() || shape.elements() == 0 || shape.standard()
}

fn fix_outputs(module: &mut Module) -> Result<bool, IrError> {
    match module.get_return() {
        Some(ret) => {
            let outputs = module[ret].inputs().to_vec();
            if outputs.iter().all(|&o| is_standard(module[o].shape())) {
                return Ok(false);
            }
            let mut fixed = Vec::with_capacity(outputs.len());
            for out in outputs {
                if is_standard(module[out].shape()) {
                    fixed.push(out);
                } else {
                    fixed.push(module.insert_instruction(ret, Operator::Contiguous, vec![out])?);
                }
            }
            module.replace_return(fixed)?;
            Ok(true)
        }
        None => match module.last() {
            Some(last) if !is_standard(module[last].shape()) => {
                module.add_instruction(Operator::Contiguous, vec![last])?;
                Ok(true)
            }
            _ => Ok(false),
        },
    }
}
