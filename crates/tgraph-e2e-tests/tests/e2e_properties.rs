mod common;

use common::{f32s, splat};
use proptest::prelude::*;
use tgraph_analysis::compute_dominator;
use tgraph_ir::{InstructionRef, Operator, Program};
use tgraph_opt::{DeadCodeElimination, OptLevel, Pass, optimize};

#[derive(Clone, Debug)]
enum Step {
    Unary(u8, usize),
    Binary(u8, usize, usize),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0u8..6, any::<usize>()).prop_map(|(op, a)| Step::Unary(op, a)),
        (0u8..4, any::<usize>(), any::<usize>()).prop_map(|(op, a, b)| Step::Binary(op, a, b)),
    ]
}

/// Builds a program over `[2, 2]` tensors from `steps`; operands index the
/// values defined so far, so every program is well formed. Transposes mix
/// strided layouts into the graph, and the `0`/`1` literals give the
/// algebraic rewrites something to remove.
fn build(steps: &[Step], outputs: &[usize]) -> Program {
    let mut p = Program::new();
    let m = p.main_module_mut();
    let mut values: Vec<InstructionRef> = vec![
        m.add_parameter("x", f32s(&[2, 2])).unwrap(),
        m.add_parameter("y", f32s(&[2, 2])).unwrap(),
        splat(m, &[2, 2], 0.5),
        splat(m, &[2, 2], 0.0),
        splat(m, &[2, 2], 1.0),
    ];
    for s in steps {
        let pick = |i: usize| values[i % values.len()];
        let ins = match *s {
            Step::Unary(op, a) => {
                let op = match op {
                    0 => Operator::Neg,
                    1 => Operator::Relu,
                    2 => Operator::Tanh,
                    3 => Operator::Identity,
                    4 => Operator::Sigmoid,
                    _ => Operator::Transpose {
                        permutation: vec![1, 0],
                    },
                };
                m.add_instruction(op, vec![pick(a)]).unwrap()
            }
            Step::Binary(op, a, b) => {
                let op = match op {
                    0 => Operator::Add,
                    1 => Operator::Sub,
                    2 => Operator::Mul,
                    _ => Operator::Max,
                };
                m.add_instruction(op, vec![pick(a), pick(b)]).unwrap()
            }
        };
        values.push(ins);
    }
    let outs: Vec<_> = outputs.iter().map(|&i| values[i % values.len()]).collect();
    m.add_return(outs).unwrap();
    p
}

proptest! {
    #[test]
    fn optimization_preserves_validity_and_output_dims(
        steps in prop::collection::vec(step(), 0..24),
        outputs in prop::collection::vec(any::<usize>(), 1..3),
        level in prop_oneof![Just(OptLevel::O0), Just(OptLevel::O1), Just(OptLevel::O2)],
    ) {
        let dims = |p: &Program| -> Vec<_> {
            p.main_module()
                .get_output_shapes()
                .iter()
                .map(|s| (s.ty(), s.lens().to_vec()))
                .collect()
        };
        let mut p = build(&steps, &outputs);
        let before = dims(&p);
        optimize(&mut p, level).unwrap();
        p.main_module().validate().unwrap();
        prop_assert_eq!(dims(&p), before);
        prop_assert_eq!(p.main_module().get_parameter_names().len(), 2);
    }

    #[test]
    fn dead_code_elimination_is_idempotent(
        steps in prop::collection::vec(step(), 0..24),
        outputs in prop::collection::vec(any::<usize>(), 1..3),
    ) {
        let mut p = build(&steps, &outputs);
        let dce = DeadCodeElimination::default();
        dce.run(p.main_module_mut()).unwrap();
        let once = p.to_record();
        prop_assert!(!dce.run(p.main_module_mut()).unwrap());
        prop_assert_eq!(p.to_record(), once);
    }

    #[test]
    fn dominators_come_before_what_they_dominate(
        steps in prop::collection::vec(step(), 0..24),
        outputs in prop::collection::vec(any::<usize>(), 1..3),
    ) {
        let p = build(&steps, &outputs);
        let m = p.main_module();
        let dom = compute_dominator(m);
        for ins in m.iter() {
            if let Some(idom) = dom.immediate_dominator(ins) {
                prop_assert!(m.position(idom) < m.position(ins));
                prop_assert!(dom.strictly_dominate(idom, ins));
            }
        }
    }
}
