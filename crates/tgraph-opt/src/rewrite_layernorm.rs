//! Recognizes the mean/variance formulation of layer normalization.
//!
//! ```text
//! d = x - mean(x)
//! y = d / sqrt(mean(d^2) + eps)      =>  y = layernorm(x, eps)
//! ```
//!
//! Both means must reduce the last axis only. The rewrite is skipped when an
//! intermediate value is used outside the pattern, which would keep the old
//! subgraph alive next to the new instruction.

use tgraph_analysis::compute_post_dominator;
use tgraph_ir::{InstructionRef, IrError, Module, Operator};

use crate::Pass;
use crate::matcher::{
    MatchResult, Matcher, Rule, any, any_of, arg, args, either_arg, find_matches, has_value,
    is_constant, name, skip_broadcasts,
};

#[derive(Debug)]
pub struct RewriteLayernorm;

impl Pass for RewriteLayernorm {
    fn name(&self) -> &str {
        "rewrite_layernorm"
    }

    fn run(&self, module: &mut Module) -> Result<bool, IrError> {
        Ok(find_matches(module, &[&Layernorm])? > 0)
    }
}

struct Layernorm;

impl Rule for Layernorm {
    fn matcher(&self) -> Matcher {
        let x = || any().bind("x");
        let mean = name("reduce_mean").and(arg(0, x())).bind("mean");
        let diff = name("sub")
            .and(arg(0, x()))
            .and(arg(1, skip_broadcasts(mean)))
            .bind("diff");
        let square = any_of(vec![
            name("pow")
                .and(arg(0, diff.clone()))
                .and(arg(1, skip_broadcasts(has_value(2.0)))),
            name("mul").and(args(vec![diff.clone(), diff.clone()])),
        ]);
        let var = name("reduce_mean").and(arg(0, square)).bind("var");
        let eps = skip_broadcasts(is_constant().bind("eps"));
        let denom = name("sqrt").and(arg(
            0,
            name("add").and(either_arg(0, 1, skip_broadcasts(var), eps)),
        ));
        name("div")
            .and(arg(0, diff))
            .and(arg(1, skip_broadcasts(denom)))
    }

    fn apply(&self, module: &mut Module, r: &MatchResult) -> Result<bool, IrError> {
        let (root, x) = (r.root, r["x"]);
        let rank = module[x].shape().ndim();
        let last_axis_only = |ins: InstructionRef| match module[ins].op() {
            Operator::ReduceMean { axes } => axes.len() == 1 && axes[0] + 1 == rank,
            _ => false,
        };
        if !last_axis_only(r["mean"]) || !last_axis_only(r["var"]) {
            log::debug!("rewrite_layernorm: {root} does not normalize the last axis");
            return Ok(false);
        }
        let Some(epsilon) = module
            .eval(r["eps"])
            .and_then(|lit| lit.data().first().copied().filter(|&e| lit.all_equal(e)))
        else {
            return Ok(false);
        };
        let pdom = compute_post_dominator(module);
        if !pdom.strictly_dominate(root, r["mean"]) || !pdom.strictly_dominate(root, r["var"])
        {
            log::debug!("rewrite_layernorm: intermediates of {root} escape the pattern");
            return Ok(false);
        }
        let ln = module.insert_instruction(root, Operator::Layernorm { epsilon }, vec![x])?;
        module.replace_instruction_with(root, ln)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgraph_ir::{ElementType, Literal, Shape};

    struct Built {
        module: Module,
        x: InstructionRef,
        mean: InstructionRef,
        div: InstructionRef,
    }

    fn layernorm_graph(axis: usize, square_with_mul: bool) -> Built {
        let mut m = Module::new("main");
        let lens = vec![2, 4];
        let x = m
            .add_parameter("x", Shape::new(ElementType::Float, lens.clone()))
            .unwrap();
        let mut reduced = lens.clone();
        reduced[axis] = 1;
        let f32s = |lens: Vec<usize>| Shape::new(ElementType::Float, lens);
        let two = m.add_literal(Literal::new(f32s(lens.clone()), vec![2.0]));
        let eps = m.add_literal(Literal::new(f32s(reduced), vec![1e-5]));

        let reduce = || Operator::ReduceMean { axes: vec![axis] };
        let widen = || Operator::Multibroadcast {
            out_lens: lens.clone(),
        };
        let mean = m.add_instruction(reduce(), vec![x]).unwrap();
        let mean_b = m.add_instruction(widen(), vec![mean]).unwrap();
        let diff = m.add_instruction(Operator::Sub, vec![x, mean_b]).unwrap();
        let sq = if square_with_mul {
            m.add_instruction(Operator::Mul, vec![diff, diff]).unwrap()
        } else {
            m.add_instruction(Operator::Pow, vec![diff, two]).unwrap()
        };
        let var = m.add_instruction(reduce(), vec![sq]).unwrap();
        let shifted = m.add_instruction(Operator::Add, vec![var, eps]).unwrap();
        let std = m.add_instruction(Operator::Sqrt, vec![shifted]).unwrap();
        let std_b = m.add_instruction(widen(), vec![std]).unwrap();
        let div = m.add_instruction(Operator::Div, vec![diff, std_b]).unwrap();
        Built {
            module: m,
            x,
            mean,
            div,
        }
    }

    #[test]
    fn pow_and_mul_forms_are_recognized() {
        for square_with_mul in [false, true] {
            let Built { mut module, x, div, .. } = layernorm_graph(1, square_with_mul);
            let ret = module.add_return(vec![div]).unwrap();
            assert!(RewriteLayernorm.run(&mut module).unwrap());
            let ln = module[ret].inputs()[0];
            let Operator::Layernorm { epsilon } = module[ln].op() else {
                panic!("expected layernorm, found {}", module[ln].op());
            };
            assert!((epsilon - 1e-5).abs() < 1e-9);
            assert_eq!(module[ln].inputs(), &[x]);
            module.validate().unwrap();
        }
    }

    #[test]
    fn other_axes_are_skipped() {
        let Built { mut module, div, .. } = layernorm_graph(0, false);
        module.add_return(vec![div]).unwrap();
        assert!(!RewriteLayernorm.run(&mut module).unwrap());
    }

    #[test]
    fn escaping_mean_blocks_the_rewrite() {
        let Built {
            mut module,
            mean,
            div,
            ..
        } = layernorm_graph(1, false);
        module.add_return(vec![div, mean]).unwrap();
        assert!(!RewriteLayernorm.run(&mut module).unwrap());
    }
}
