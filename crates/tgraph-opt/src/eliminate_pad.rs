//! Folds explicit zero padding into convolution padding.

use tgraph_ir::{InstructionRef, IrError, Module, Operator, PadMode};

use crate::Pass;

/// Replaces `convolution(pad(x), w)` with `convolution(x, w)` whose padding
/// absorbs the pad's spatial amounts.
///
/// Only constant-zero pads that leave the batch and channel axes alone are
/// folded. The pad itself is left for dead-code elimination.
#[derive(Debug)]
pub struct EliminatePad;

impl Pass for EliminatePad {
    fn name(&self) -> &str {
        "eliminate_pad"
    }

    fn run(&self, module: &mut Module) -> Result<bool, IrError> {
        let order: Vec<InstructionRef> = module.iter().collect();
        let mut changed = false;
        for ins in order {
            let Some((op, inputs)) = fold(module, ins) else {
                continue;
            };
            module.replace_instruction(ins, op, inputs)?;
            changed = true;
        }
        Ok(changed)
    }
}

/// The folded convolution and its new inputs, if `ins` qualifies.
fn fold(module: &Module, ins: InstructionRef) -> Option<(Operator, Vec<InstructionRef>)> {
    let node = &module[ins];
    let Operator::Convolution {
        padding,
        stride,
        dilation,
        group,
    } = node.op()
    else {
        return None;
    };
    let (&input, rest) = node.inputs().split_first()?;
    let pad_node = &module[input];
    let Operator::Pad { pads, mode, value } = pad_node.op() else {
        return None;
    };
    if *mode != PadMode::Constant || *value != 0.0 {
        return None;
    }
    let ndim = pad_node.shape().ndim();
    let k = ndim.checked_sub(2)?;
    if pads.len() != 2 * ndim || pads[..2] != [0, 0] || pads[ndim..ndim + 2] != [0, 0] {
        return None;
    }
    let (begin, end) = match padding.len() {
        n if n == k => (padding.as_slice(), padding.as_slice()),
        n if n == 2 * k => padding.split_at(k),
        _ => return None,
    };
    let mut folded = Vec::with_capacity(2 * k);
    folded.extend((0..k).map(|i| begin[i] + pads[2 + i]));
    folded.extend((0..k).map(|i| end[i] + pads[ndim + 2 + i]));

    let x = *pad_node.inputs().first()?;
    let mut inputs = vec![x];
    inputs.extend_from_slice(rest);
    let op = Operator::Convolution {
        padding: folded,
        stride: stride.clone(),
        dilation: dilation.clone(),
        group: *group,
    };
    Some((op, inputs))
}
