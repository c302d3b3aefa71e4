//! Dead code elimination pass.
//!
//! Walks the module backwards from its last instruction. An instruction
//! without users is unlinked from its inputs and moved to the tail, and its
//! former inputs are revisited. Everything after the original last
//! instruction is then erased in one step.

use std::collections::HashSet;

use tgraph_ir::{Instruction, IrError, Module};

use crate::Pass;

/// Default predicate for instructions kept despite having no users.
///
/// A static, non-tuple result with zero elements is presumed to exist for
/// its side effect, unless the operator is known to be removable in that
/// state.
pub fn keep_when_empty(ins: &Instruction) -> bool {
    let shape = ins.shape();
    !shape.is_tuple()
        && !shape.dynamic_shape()
        && shape.elements() == 0
        && !ins.op().attributes().removable_when_empty
}

/// Removes instructions whose results are never used.
///
/// Parameters are never removed. `keep` protects an unused instruction
/// from being the start of a removal; inputs freed by a removal are
/// collected regardless.
#[derive(Debug, Clone, Copy)]
pub struct DeadCodeElimination {
    pub keep: fn(&Instruction) -> bool,
}

impl Default for DeadCodeElimination {
    fn default() -> Self {
        Self {
            keep: keep_when_empty,
        }
    }
}

impl Pass for DeadCodeElimination {
    fn name(&self) -> &str {
        "dead_code_elimination"
    }

    fn run(&self, module: &mut Module) -> Result<bool, IrError> {
        let Some(last) = module.last() else {
            return Ok(false);
        };
        let candidates: Vec<_> = module.iter().rev().skip(1).collect();
        let mut dead = HashSet::new();
        for ins in candidates {
            if dead.contains(&ins) || !module.has_instruction(ins) || (self.keep)(&module[ins]) {
                continue;
            }
            let mut stack = vec![ins];
            while let Some(leaf) = stack.pop() {
                if leaf == last || dead.contains(&leaf) || !module.has_instruction(leaf) {
                    continue;
                }
                let node = &module[leaf];
                if !node.outputs().is_empty() || node.param_name().is_some() {
                    continue;
                }
                let inputs = node.inputs().to_vec();
                module.clear_inputs(leaf)?;
                module.move_to_end(leaf)?;
                dead.insert(leaf);
                stack.extend(inputs);
            }
        }
        let removed = module.remove_after(last)?;
        if removed > 0 {
            log::debug!("{}: removed {removed} dead instructions", module.name());
        }
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgraph_ir::{ElementType, InstructionRef, Literal, Operator, Shape};

    fn f32s(lens: &[usize]) -> Shape {
        Shape::new(ElementType::Float, lens.to_vec())
    }

    #[test]
    fn removes_dead_chains() {
        let mut m = Module::new("main");
        let x = m.add_parameter("x", f32s(&[4])).unwrap();
        let y = m.add_parameter("y", f32s(&[4])).unwrap();
        let a = m.add_instruction(Operator::Exp, vec![x]).unwrap();
        let b = m.add_instruction(Operator::Add, vec![a, y]).unwrap();
        let live = m.add_instruction(Operator::Relu, vec![x]).unwrap();
        m.add_return(vec![live]).unwrap();

        assert!(DeadCodeElimination::default().run(&mut m).unwrap());
        assert!(!m.has_instruction(a));
        assert!(!m.has_instruction(b));
        assert!(m.has_instruction(y));
        assert_eq!(m.len(), 4);
        assert_eq!(m[x].outputs(), &[live]);
        assert!(m[y].outputs().is_empty());
        m.validate().unwrap();
    }

    #[test]
    fn is_idempotent() {
        let mut m = Module::new("main");
        let x = m.add_parameter("x", f32s(&[4])).unwrap();
        let lit = m.add_literal(Literal::new(f32s(&[4]), vec![2.0]));
        let unused = m.add_instruction(Operator::Mul, vec![x, lit]).unwrap();
        m.add_instruction(Operator::Sqrt, vec![unused]).unwrap();
        m.add_instruction(Operator::Neg, vec![x]).unwrap();

        let dce = DeadCodeElimination::default();
        assert!(dce.run(&mut m).unwrap());
        let once: Vec<_> = m.iter().collect();
        assert!(!dce.run(&mut m).unwrap());
        assert_eq!(m.iter().collect::<Vec<_>>(), once);
        assert!(!m.has_instruction(lit));
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn last_instruction_is_kept_without_return() {
        let mut m = Module::new("main");
        let x = m.add_parameter("x", f32s(&[4])).unwrap();
        let out = m.add_instruction(Operator::Tanh, vec![x]).unwrap();
        assert!(!DeadCodeElimination::default().run(&mut m).unwrap());
        assert_eq!(m.last(), Some(out));
    }

    #[test]
    fn empty_side_effecting_results_survive() {
        let mut m = Module::new("main");
        let x = m.add_parameter("x", f32s(&[0])).unwrap();
        let effect = m.add_instruction(Operator::Relu, vec![x]).unwrap();
        let scratch = m
            .add_instruction(Operator::Allocate { shape: f32s(&[0]) }, Vec::<InstructionRef>::new())
            .unwrap();
        let out = m.add_instruction(Operator::Neg, vec![x]).unwrap();
        m.add_return(vec![out]).unwrap();

        DeadCodeElimination::default().run(&mut m).unwrap();
        assert!(m.has_instruction(effect));
        assert!(!m.has_instruction(scratch));
        m.validate().unwrap();
    }

    #[test]
    fn keep_predicate_is_configurable() {
        let mut m = Module::new("main");
        let x = m.add_parameter("x", f32s(&[0])).unwrap();
        let effect = m.add_instruction(Operator::Relu, vec![x]).unwrap();
        m.add_return(vec![x]).unwrap();

        let dce = DeadCodeElimination { keep: |_| false };
        assert!(dce.run(&mut m).unwrap());
        assert!(!m.has_instruction(effect));
    }

    #[test]
    fn keep_applies_only_where_removal_starts() {
        let mut m = Module::new("main");
        let x = m.add_parameter("x", f32s(&[4])).unwrap();
        let r = m.add_instruction(Operator::Relu, vec![x]).unwrap();
        let n = m.add_instruction(Operator::Neg, vec![r]).unwrap();
        let kept = m.add_instruction(Operator::Relu, vec![x]).unwrap();
        m.add_return(vec![x]).unwrap();

        let dce = DeadCodeElimination {
            keep: |ins| ins.op() == &Operator::Relu,
        };
        assert!(dce.run(&mut m).unwrap());
        assert!(!m.has_instruction(n));
        assert!(!m.has_instruction(r));
        assert!(m.has_instruction(kept));
        m.validate().unwrap();
    }
}
