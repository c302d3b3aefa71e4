//! Removes redundant `convert` instructions.

use tgraph_ir::{IrError, Module, Operator};

use crate::Pass;
use crate::matcher::{MatchResult, Matcher, Rule, arg, find_matches, name, same_shape_as_input};

/// Collapses chains of converts and drops converts that change nothing.
///
/// `convert(convert(x))` becomes `x` when the final shape equals `x`'s and
/// a single `convert(x)` to the final type otherwise.
#[derive(Debug)]
pub struct EliminateConvert;

impl Pass for EliminateConvert {
    fn name(&self) -> &str {
        "eliminate_convert"
    }

    fn run(&self, module: &mut Module) -> Result<bool, IrError> {
        Ok(find_matches(module, &[&NestedConvert, &NopConvert])? > 0)
    }
}

struct NestedConvert;

impl Rule for NestedConvert {
    fn matcher(&self) -> Matcher {
        name("convert").and(arg(0, name("convert")))
    }

    fn apply(&self, module: &mut Module, r: &MatchResult) -> Result<bool, IrError> {
        let mut source = r.root;
        while let (Operator::Convert { .. }, &[input]) =
            (module[source].op(), module[source].inputs())
        {
            source = input;
        }
        let target = module[r.root].shape().clone();
        if module[source].shape() == &target {
            module.replace_instruction_with(r.root, source)?;
        } else {
            let op = Operator::Convert {
                target_type: target.ty(),
            };
            module.replace_instruction(r.root, op, vec![source])?;
        }
        Ok(true)
    }
}

struct NopConvert;

impl Rule for NopConvert {
    fn matcher(&self) -> Matcher {
        name("convert").and(same_shape_as_input(0))
    }

    fn apply(&self, module: &mut Module, r: &MatchResult) -> Result<bool, IrError> {
        let input = module[r.root].inputs()[0];
        module.replace_instruction_with(r.root, input)?;
        Ok(true)
    }
}
