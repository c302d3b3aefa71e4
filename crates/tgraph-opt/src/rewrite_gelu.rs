//! Replaces the erf formulation of GELU with its sigmoid approximation.
//!
//! `0.5 * x * (1 + erf(x / sqrt(2)))` becomes `x * sigmoid(1.702 * x)`.

use std::f64::consts::{FRAC_1_SQRT_2, SQRT_2};

use tgraph_ir::{IrError, Literal, Module, Operator};

use crate::Pass;
use crate::matcher::{
    MatchResult, Matcher, Rule, any, any_of, arg, either_arg, find_matches, has_value, name,
    skip_broadcasts,
};

const SIGMOID_SCALE: f64 = 1.702;

#[derive(Debug)]
pub struct RewriteGelu;

impl Pass for RewriteGelu {
    fn name(&self) -> &str {
        "rewrite_gelu"
    }

    fn run(&self, module: &mut Module) -> Result<bool, IrError> {
        Ok(find_matches(module, &[&GeluErf])? > 0)
    }
}

fn constant(value: f64) -> Matcher {
    skip_broadcasts(has_value(value))
}

struct GeluErf;

impl Rule for GeluErf {
    fn matcher(&self) -> Matcher {
        let x = || any().bind("x");
        // x / sqrt(2) or x * (1 / sqrt(2))
        let scaled = any_of(vec![
            name("div")
                .and(arg(0, x()))
                .and(arg(1, constant(SQRT_2))),
            name("mul").and(either_arg(0, 1, x(), constant(FRAC_1_SQRT_2))),
        ]);
        let erf = name("erf").and(arg(0, scaled));
        let one_plus_erf = name("add").and(either_arg(0, 1, erf, constant(1.0)));
        let half_x = name("mul").and(either_arg(0, 1, x(), constant(0.5)));
        let x_times_erf = name("mul").and(either_arg(0, 1, x(), one_plus_erf.clone()));
        any_of(vec![
            name("mul").and(either_arg(0, 1, half_x, one_plus_erf)),
            name("mul").and(either_arg(0, 1, x_times_erf, constant(0.5))),
        ])
    }

    fn apply(&self, module: &mut Module, r: &MatchResult) -> Result<bool, IrError> {
        let (ins, x) = (r.root, r["x"]);
        let shape = module[x].shape().clone();
        if shape.dynamic_shape() {
            log::warn!("rewrite_gelu: skipping {ins}, dynamic input shape {shape}");
            return Ok(false);
        }
        let lit = module.add_literal(Literal::scalar(shape.ty(), SIGMOID_SCALE));
        let k = module.insert_instruction(
            ins,
            Operator::Multibroadcast {
                out_lens: shape.lens().to_vec(),
            },
            vec![lit],
        )?;
        let kx = module.insert_instruction(ins, Operator::Mul, vec![x, k])?;
        let sig = module.insert_instruction(ins, Operator::Sigmoid, vec![kx])?;
        let gelu = module.insert_instruction(ins, Operator::Mul, vec![x, sig])?;
        module.replace_instruction_with(ins, gelu)?;
        Ok(true)
    }
}
