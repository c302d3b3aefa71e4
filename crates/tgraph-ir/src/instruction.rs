//! Instruction nodes of the graph.

use crate::arena::Handle;
use crate::literal::Literal;
use crate::module::ModuleRef;
use crate::operator::Operator;
use crate::shape::Shape;

/// Stable handle to an instruction within its owning [`Module`](crate::Module).
pub type InstructionRef = Handle<Instruction>;

/// One operator application.
///
/// `inputs` point at earlier instructions; `outputs` are back-references to
/// the users of this instruction (each user listed once). Both lists are kept
/// consistent by the owning module.
#[derive(Clone, Debug)]
pub struct Instruction {
    pub(crate) op: Operator,
    pub(crate) inputs: Vec<InstructionRef>,
    pub(crate) outputs: Vec<InstructionRef>,
    pub(crate) shape: Shape,
    pub(crate) module_args: Vec<ModuleRef>,
    /// Output shapes of `module_args`, captured when the instruction was built.
    pub(crate) module_outputs: Vec<Vec<Shape>>,
}

impl Instruction {
    pub(crate) fn new(
        op: Operator,
        inputs: Vec<InstructionRef>,
        shape: Shape,
        module_args: Vec<ModuleRef>,
        module_outputs: Vec<Vec<Shape>>,
    ) -> Self {
        Self {
            op,
            inputs,
            outputs: Vec::new(),
            shape,
            module_args,
            module_outputs,
        }
    }

    pub fn op(&self) -> &Operator {
        &self.op
    }

    /// Operator name, e.g. `"convolution"`.
    pub fn name(&self) -> &'static str {
        self.op.name()
    }

    pub fn inputs(&self) -> &[InstructionRef] {
        &self.inputs
    }

    /// Users of this instruction.
    pub fn outputs(&self) -> &[InstructionRef] {
        &self.outputs
    }

    /// Cached output shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Sub-modules referenced by control-flow operators.
    pub fn module_args(&self) -> &[ModuleRef] {
        &self.module_args
    }

    pub fn module_outputs(&self) -> &[Vec<Shape>] {
        &self.module_outputs
    }

    /// The constant value of a `@literal`.
    pub fn literal(&self) -> Option<&Literal> {
        match &self.op {
            Operator::Literal(lit) => Some(lit),
            _ => None,
        }
    }

    /// The name of a `@param`.
    pub fn param_name(&self) -> Option<&str> {
        match &self.op {
            Operator::Parameter { name, .. } => Some(name),
            _ => None,
        }
    }

    pub(crate) fn add_output(&mut self, user: InstructionRef) {
        if !self.outputs.contains(&user) {
            self.outputs.push(user);
        }
    }

    pub(crate) fn remove_output(&mut self, user: InstructionRef) {
        self.outputs.retain(|&u| u != user);
    }
}
