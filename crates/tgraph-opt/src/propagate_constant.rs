//! Constant propagation pass.
//!
//! Replaces each maximal constant subexpression with a `@literal` holding
//! its evaluated value.

use std::collections::HashMap;

use tgraph_ir::{InstructionRef, IrError, Literal, Module};

use crate::Pass;

/// Folds instructions whose transitive inputs are all literals.
///
/// An instruction is folded only where its value leaves the constant
/// region: when it is the module output or has a non-constant user.
/// Broadcast views of a literal are left alone, so the literal stays small,
/// and so are other non-standard results.
#[derive(Debug)]
pub struct PropagateConstant;

impl Pass for PropagateConstant {
    fn name(&self) -> &str {
        "propagate_constant"
    }

    fn run(&self, module: &mut Module) -> Result<bool, IrError> {
        let order: Vec<InstructionRef> = module.iter().collect();
        let last = module.last();
        let mut cache: HashMap<InstructionRef, Option<Literal>> = HashMap::new();
        let mut folds = Vec::new();
        for &ins in &order {
            let node = &module[ins];
            if node.inputs().is_empty() || node.op().is_builtin() {
                continue;
            }
            if node.op().attributes().broadcast
                && node.inputs().iter().all(|&i| module[i].literal().is_some())
            {
                continue;
            }
            let is_output = Some(ins) == last;
            let escapes = node
                .outputs()
                .iter()
                .any(|&u| module.eval_cached(u, &mut cache).is_none());
            if !is_output && !escapes {
                continue;
            }
            // Literals are standard; a strided result has no literal equivalent.
            if let Some(value) = module.eval_cached(ins, &mut cache)
                && value.shape() == node.shape()
            {
                folds.push((ins, value));
            }
        }

        let changed = !folds.is_empty();
        for (ins, value) in folds {
            log::trace!("{}: folding {ins} into a literal", module.name());
            let lit = module.add_literal(value);
            module.replace_instruction_with(ins, lit)?;
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgraph_ir::{ElementType, Operator, Shape};

    fn f32s(lens: &[usize]) -> Shape {
        Shape::new(ElementType::Float, lens.to_vec())
    }

    #[test]
    fn folds_constant_subgraph_feeding_a_parameter_use() {
        let mut m = Module::new("main");
        let x = m.add_parameter("x", f32s(&[3])).unwrap();
        let a = m.add_literal(Literal::new(f32s(&[3]), vec![1.0, 2.0, 3.0]));
        let b = m.add_literal(Literal::new(f32s(&[3]), vec![1.0]));
        let sum = m.add_instruction(Operator::Add, vec![a, b]).unwrap();
        let sq = m.add_instruction(Operator::Mul, vec![sum, sum]).unwrap();
        let out = m.add_instruction(Operator::Add, vec![x, sq]).unwrap();
        m.add_return(vec![out]).unwrap();

        assert!(PropagateConstant.run(&mut m).unwrap());
        let folded = m[out].inputs()[1];
        assert_eq!(m[folded].literal().unwrap().data(), &[4.0, 9.0, 16.0]);
        assert_eq!(m[sum].outputs(), &[sq]);
        assert!(m[sq].outputs().is_empty());
        m.validate().unwrap();
    }

    #[test]
    fn constant_output_is_folded() {
        let mut m = Module::new("main");
        let a = m.add_literal(Literal::new(f32s(&[2]), vec![4.0, 9.0]));
        let root = m.add_instruction(Operator::Sqrt, vec![a]).unwrap();
        assert!(PropagateConstant.run(&mut m).unwrap());
        assert_eq!(m.last(), Some(root));
        assert_eq!(m[root].op(), &Operator::Identity);
        let lit = m[root].inputs()[0];
        assert_eq!(m[lit].literal().unwrap().data(), &[2.0, 3.0]);
    }

    #[test]
    fn broadcast_literals_stay_views() {
        let mut m = Module::new("main");
        let x = m.add_parameter("x", f32s(&[2, 2])).unwrap();
        let one = m.add_literal(Literal::scalar(ElementType::Float, 1.0));
        let b = m
            .add_instruction(Operator::Multibroadcast { out_lens: vec![2, 2] }, vec![one])
            .unwrap();
        let out = m.add_instruction(Operator::Mul, vec![x, b]).unwrap();
        m.add_return(vec![out]).unwrap();
        assert!(!PropagateConstant.run(&mut m).unwrap());
        assert_eq!(m[out].inputs(), &[x, b]);
    }

    #[test]
    fn transposed_constants_are_not_folded() {
        let mut m = Module::new("main");
        let c = m.add_literal(Literal::new(f32s(&[2, 3]), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]));
        let ct = m
            .add_instruction(Operator::Transpose { permutation: vec![1, 0] }, vec![c])
            .unwrap();
        let x = m.add_parameter("x", f32s(&[2, 3])).unwrap();
        let xt = m
            .add_instruction(Operator::Transpose { permutation: vec![1, 0] }, vec![x])
            .unwrap();
        let prod = m.add_instruction(Operator::Mul, vec![ct, xt]).unwrap();
        let out = m.add_instruction(Operator::Neg, vec![prod]).unwrap();
        m.add_return(vec![out]).unwrap();

        assert!(!PropagateConstant.run(&mut m).unwrap());
        assert_eq!(m[prod].inputs(), &[ct, xt]);
        m.validate().unwrap();
    }
}
