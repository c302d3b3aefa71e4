use tgraph_ir::{ElementType, InstructionRef, Literal, Module, Operator, Program, Shape};
use tgraph_opt::{PassManager, PassRegistry, PipelineConfig};

#[allow(dead_code)]
pub fn f32s(lens: &[usize]) -> Shape {
    Shape::new(ElementType::Float, lens.to_vec())
}

/// A literal filled with `value`.
#[allow(dead_code)]
pub fn splat(m: &mut Module, lens: &[usize], value: f64) -> InstructionRef {
    m.add_literal(Literal::new(f32s(lens), vec![value]))
}

/// Operator names of `module`, in order.
#[allow(dead_code)]
pub fn op_names(module: &Module) -> Vec<&'static str> {
    module.iter().map(|i| module[i].name()).collect()
}

/// Runs the named passes through a pipeline built from the builtin registry.
#[allow(dead_code)]
pub fn run_passes(program: &mut Program, passes: &[&str]) -> bool {
    let registry = PassRegistry::with_builtins();
    let config = PipelineConfig::with_passes(passes.iter().copied());
    PassManager::from_config(&registry, &config)
        .expect("pipeline should resolve")
        .run(program)
        .expect("pipeline should run")
}

/// `conv(pad(x), w)` with end-only spatial padding of 2.
#[allow(dead_code)]
pub fn padded_conv() -> Program {
    let mut p = Program::new();
    let m = p.main_module_mut();
    let x = m.add_parameter("x", f32s(&[1, 3, 8, 8])).expect("parameter");
    let w = splat(m, &[4, 3, 3, 3], 0.25);
    let pad = m
        .add_instruction(Operator::pad(vec![0, 0, 0, 0, 0, 0, 2, 2]), vec![x])
        .expect("pad");
    let conv = m
        .add_instruction(Operator::convolution_2d(), vec![pad, w])
        .expect("convolution");
    m.add_return(vec![conv]).expect("return");
    p
}

/// `0.5 * x * (1 + erf(x / sqrt(2)))` over a `[2, 3]` input.
#[allow(dead_code)]
pub fn gelu_program() -> Program {
    let lens = [2, 3];
    let mut p = Program::new();
    let m = p.main_module_mut();
    let x = m.add_parameter("x", f32s(&lens)).expect("parameter");
    let sqrt2 = splat(m, &lens, std::f64::consts::SQRT_2);
    let one = splat(m, &lens, 1.0);
    let half = splat(m, &lens, 0.5);
    let scaled = m.add_instruction(Operator::Div, vec![x, sqrt2]).expect("div");
    let erf = m.add_instruction(Operator::Erf, vec![scaled]).expect("erf");
    let shifted = m.add_instruction(Operator::Add, vec![erf, one]).expect("add");
    let hx = m.add_instruction(Operator::Mul, vec![half, x]).expect("mul");
    let out = m.add_instruction(Operator::Mul, vec![hx, shifted]).expect("mul");
    m.add_return(vec![out]).expect("return");
    p
}

/// Layer normalization over the last axis of a `[2, 4]` input, spelled out
/// with means, a square and a square root.
#[allow(dead_code)]
pub fn layernorm_program() -> Program {
    let lens = [2, 4];
    let reduced = [2, 1];
    let mut p = Program::new();
    let m = p.main_module_mut();
    let x = m.add_parameter("x", f32s(&lens)).expect("parameter");
    let two = splat(m, &lens, 2.0);
    let eps = splat(m, &reduced, 1e-5);
    let reduce = || Operator::ReduceMean { axes: vec![1] };
    let widen = || Operator::Multibroadcast {
        out_lens: lens.to_vec(),
    };
    let mean = m.add_instruction(reduce(), vec![x]).expect("mean");
    let mean_b = m.add_instruction(widen(), vec![mean]).expect("broadcast");
    let diff = m.add_instruction(Operator::Sub, vec![x, mean_b]).expect("sub");
    let sq = m.add_instruction(Operator::Pow, vec![diff, two]).expect("pow");
    let var = m.add_instruction(reduce(), vec![sq]).expect("variance");
    let shifted = m.add_instruction(Operator::Add, vec![var, eps]).expect("add");
    let std = m.add_instruction(Operator::Sqrt, vec![shifted]).expect("sqrt");
    let std_b = m.add_instruction(widen(), vec![std]).expect("broadcast");
    let out = m.add_instruction(Operator::Div, vec![diff, std_b]).expect("div");
    m.add_return(vec![out]).expect("return");
    p
}
