//! Algebraic identities: `x+0`, `x-0`, `x*1`, `x/1` and `neg(neg(x))`.
//!
//! Constants are recognized through `broadcast`/`multibroadcast` views, so a
//! broadcast scalar `0` counts as zero.

use tgraph_ir::{IrError, Module};

use crate::{Pass, replace_keeping_shape};
use crate::matcher::{
    MatchResult, Matcher, Rule, any, arg, either_arg, find_matches, has_value, name,
    skip_broadcasts,
};

#[derive(Debug)]
pub struct SimplifyAlgebra;

impl Pass for SimplifyAlgebra {
    fn name(&self) -> &str {
        "simplify_algebra"
    }

    fn run(&self, module: &mut Module) -> Result<bool, IrError> {
        let rules: [&dyn Rule; 5] = [
            &Neutral {
                op: "add",
                value: 0.0,
                commutative: true,
            },
            &Neutral {
                op: "sub",
                value: 0.0,
                commutative: false,
            },
            &Neutral {
                op: "mul",
                value: 1.0,
                commutative: true,
            },
            &Neutral {
                op: "div",
                value: 1.0,
                commutative: false,
            },
            &DoubleNeg,
        ];
        Ok(find_matches(module, &rules)? > 0)
    }
}

/// `op(x, value)` → `x`; also `op(value, x)` when `commutative`.
struct Neutral {
    op: &'static str,
    value: f64,
    commutative: bool,
}

impl Rule for Neutral {
    fn matcher(&self) -> Matcher {
        let neutral = skip_broadcasts(has_value(self.value));
        let x = any().bind("x");
        let operands = if self.commutative {
            either_arg(0, 1, x, neutral)
        } else {
            arg(0, x).and(arg(1, neutral))
        };
        name(self.op).and(operands)
    }

    fn apply(&self, module: &mut Module, r: &MatchResult) -> Result<bool, IrError> {
        replace_keeping_shape(module, r.root, r["x"])
    }
}

struct DoubleNeg;

impl Rule for DoubleNeg {
    fn matcher(&self) -> Matcher {
        name("neg").and(arg(0, name("neg").and(arg(0, any().bind("x")))))
    }

    fn apply(&self, module: &mut Module, r: &MatchResult) -> Result<bool, IrError> {
        replace_keeping_shape(module, r.root, r["x"])
    }
}
