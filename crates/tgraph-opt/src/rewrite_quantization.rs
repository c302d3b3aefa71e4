//! Lowers `quantizelinear` and `dequantizelinear` to elementwise arithmetic.
//!
//! ```text
//! quantizelinear(x, s, z)   = convert(clip(nearbyint(x / s) + z, lo, hi))
//! dequantizelinear(q, s, z) = (convert(q) - convert(z)) * s
//! ```
//!
//! `lo` and `hi` are the limits of the quantized element type.

use tgraph_ir::{ElementType, InstructionRef, IrError, Literal, Module, Operator};

use crate::Pass;
use crate::matcher::{MatchResult, Matcher, Rule, find_matches, name};

#[derive(Debug)]
pub struct RewriteQuantization;

impl Pass for RewriteQuantization {
    fn name(&self) -> &str {
        "rewrite_quantization"
    }

    fn run(&self, module: &mut Module) -> Result<bool, IrError> {
        Ok(find_matches(module, &[&Quantize, &Dequantize])? > 0)
    }
}

fn convert_to(
    module: &mut Module,
    before: InstructionRef,
    ins: InstructionRef,
    ty: ElementType,
) -> Result<InstructionRef, IrError> {
    if module[ins].shape().ty() == ty {
        return Ok(ins);
    }
    module.insert_instruction(before, Operator::Convert { target_type: ty }, vec![ins])
}

/// A scalar literal broadcast to `lens`.
fn splat(
    module: &mut Module,
    before: InstructionRef,
    ty: ElementType,
    value: f64,
    lens: &[usize],
) -> Result<InstructionRef, IrError> {
    let lit = module.add_literal(Literal::scalar(ty, value));
    let op = Operator::Multibroadcast {
        out_lens: lens.to_vec(),
    };
    module.insert_instruction(before, op, vec![lit])
}

struct Quantize;

impl Rule for Quantize {
    fn matcher(&self) -> Matcher {
        name("quantizelinear")
    }

    fn apply(&self, module: &mut Module, r: &MatchResult) -> Result<bool, IrError> {
        let ins = r.root;
        let inputs = module[ins].inputs().to_vec();
        let out_type = module[ins].shape().ty();
        let lens = module[ins].shape().lens().to_vec();
        let (x, scale) = (inputs[0], inputs[1]);
        let scale_type = module[scale].shape().ty();

        let x = convert_to(module, ins, x, scale_type)?;
        let scaled = module.insert_instruction(ins, Operator::Div, vec![x, scale])?;
        let mut rounded = module.insert_instruction(ins, Operator::Nearbyint, vec![scaled])?;
        if let Some(&zp) = inputs.get(2) {
            let zp = convert_to(module, ins, zp, scale_type)?;
            rounded = module.insert_instruction(ins, Operator::Add, vec![rounded, zp])?;
        }
        let lo = splat(module, ins, scale_type, out_type.min_value(), &lens)?;
        let hi = splat(module, ins, scale_type, out_type.max_value(), &lens)?;
        let clipped = module.insert_instruction(ins, Operator::Clip, vec![rounded, lo, hi])?;
        let quantized = convert_to(module, ins, clipped, out_type)?;
        module.replace_instruction_with(ins, quantized)?;
        Ok(true)
    }
}

struct Dequantize;

impl Rule for Dequantize {
    fn matcher(&self) -> Matcher {
        name("dequantizelinear")
    }

    fn apply(&self, module: &mut Module, r: &MatchResult) -> Result<bool, IrError> {
        let ins = r.root;
        let inputs = module[ins].inputs().to_vec();
        let (q, scale) = (inputs[0], inputs[1]);
        let scale_type = module[scale].shape().ty();

        let mut shifted = convert_to(module, ins, q, scale_type)?;
        if let Some(&zp) = inputs.get(2) {
            let zp = convert_to(module, ins, zp, scale_type)?;
            shifted = module.insert_instruction(ins, Operator::Sub, vec![shifted, zp])?;
        }
        let result = module.insert_instruction(ins, Operator::Mul, vec![shifted, scale])?;
        module.replace_instruction_with(ins, result)?;
        Ok(true)
    }
}
