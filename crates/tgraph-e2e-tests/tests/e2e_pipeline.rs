mod common;

use common::{f32s, gelu_program, layernorm_program, op_names, padded_conv, run_passes, splat};
use tgraph_ir::{Literal, Operator, Program, ProgramRecord};
use tgraph_opt::{OptLevel, PassManager, PassRegistry, PipelineConfig, optimize};

fn conv_padding(program: &Program) -> Vec<usize> {
    let m = program.main_module();
    let conv = m
        .iter()
        .find(|&i| m[i].name() == "convolution")
        .expect("convolution survives");
    match m[conv].op() {
        Operator::Convolution { padding, .. } => padding.clone(),
        other => panic!("expected convolution, found {other}"),
    }
}

#[test]
fn pad_folds_into_convolution() {
    let mut p = padded_conv();
    let before = p.main_module().get_output_shapes();
    assert!(run_passes(&mut p, &["eliminate_pad", "dead_code_elimination"]));

    let m = p.main_module();
    assert_eq!(op_names(m), ["@literal", "@param", "convolution", "@return"]);
    assert_eq!(conv_padding(&p), [0, 0, 2, 2]);
    assert_eq!(m.get_output_shapes(), before);
    m.validate().unwrap();
}

#[test]
fn pipeline_loaded_from_json() {
    let config = PipelineConfig::from_json(
        r#"{ "passes": ["eliminate_pad"], "final_dce": false }"#,
    )
    .unwrap();
    let pm = PassManager::from_config(&PassRegistry::with_builtins(), &config).unwrap();
    assert_eq!(pm.pass_names(), ["eliminate_pad"]);

    let mut p = padded_conv();
    assert!(pm.run(&mut p).unwrap());
    // Without the final sweep the orphaned pad stays behind.
    assert!(op_names(p.main_module()).contains(&"pad"));
    assert_eq!(conv_padding(&p), [0, 0, 2, 2]);
}

#[test]
fn serialized_program_survives_optimization() {
    let json = serde_json::to_string(&padded_conv().to_record()).unwrap();
    let record: ProgramRecord = serde_json::from_str(&json).unwrap();
    let mut p = Program::from_record(&record).unwrap();

    optimize(&mut p, OptLevel::O1).unwrap();
    assert_eq!(conv_padding(&p), [0, 0, 2, 2]);

    let reloaded = Program::from_record(&p.to_record()).unwrap();
    assert_eq!(reloaded.to_record(), p.to_record());
}

#[test]
fn o2_rewrites_gelu_to_sigmoid_form() {
    let mut p = gelu_program();
    let before = p.main_module().get_output_shapes();
    assert!(optimize(&mut p, OptLevel::O2).unwrap());

    let names = op_names(p.main_module());
    assert!(!names.contains(&"erf"), "erf left in {names:?}");
    assert!(names.contains(&"sigmoid"));
    assert_eq!(p.main_module().get_output_shapes(), before);
}

#[test]
fn o1_leaves_gelu_alone() {
    let mut p = gelu_program();
    optimize(&mut p, OptLevel::O1).unwrap();
    assert!(op_names(p.main_module()).contains(&"erf"));
}

#[test]
fn o2_fuses_layernorm() {
    let mut p = layernorm_program();
    assert!(optimize(&mut p, OptLevel::O2).unwrap());

    let m = p.main_module();
    assert_eq!(op_names(m), ["@param", "layernorm", "@return"]);
    let ln = m.iter().nth(1).unwrap();
    let Operator::Layernorm { epsilon } = m[ln].op() else {
        panic!("expected layernorm");
    };
    assert!((epsilon - 1e-5).abs() < 1e-9);
}

#[test]
fn o0_keeps_the_computation() {
    let mut p = layernorm_program();
    let before = op_names(p.main_module()).len();
    assert!(!optimize(&mut p, OptLevel::O0).unwrap());
    assert_eq!(op_names(p.main_module()).len(), before);
}

fn transpose() -> Operator {
    Operator::Transpose {
        permutation: vec![1, 0],
    }
}

#[test]
fn neutral_add_on_a_transpose_keeps_downstream_shapes() {
    let mut p = Program::new();
    let m = p.main_module_mut();
    let x = m.add_parameter("x", f32s(&[2, 3])).unwrap();
    let t = m.add_instruction(transpose(), vec![x]).unwrap();
    let zeros = splat(m, &[3, 2], 0.0);
    let sum = m.add_instruction(Operator::Add, vec![t, zeros]).unwrap();
    let r = m.add_instruction(Operator::Relu, vec![sum]).unwrap();
    let n = m.add_instruction(Operator::Neg, vec![r]).unwrap();
    m.add_return(vec![n]).unwrap();
    let before = p.main_module().get_output_shapes();

    assert!(optimize(&mut p, OptLevel::O1).unwrap());
    let m = p.main_module();
    m.validate().unwrap();
    assert!(!op_names(m).contains(&"add"));
    assert_eq!(m.get_output_shapes(), before);
}

#[test]
fn product_of_transposes_with_a_constant_side_stays_valid() {
    let mut p = Program::new();
    let m = p.main_module_mut();
    let c = m.add_literal(Literal::new(f32s(&[2, 3]), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]));
    let ct = m.add_instruction(transpose(), vec![c]).unwrap();
    let x = m.add_parameter("x", f32s(&[2, 3])).unwrap();
    let xt = m.add_instruction(transpose(), vec![x]).unwrap();
    let prod = m.add_instruction(Operator::Mul, vec![ct, xt]).unwrap();
    let n = m.add_instruction(Operator::Neg, vec![prod]).unwrap();
    m.add_return(vec![n]).unwrap();

    optimize(&mut p, OptLevel::O1).unwrap();
    let m = p.main_module();
    m.validate().unwrap();
    assert_eq!(m.get_output_shapes()[0].lens(), [3, 2]);
    assert!(op_names(m).contains(&"mul"));
}
