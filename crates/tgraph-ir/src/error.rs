//! Error types for the tgraph IR.

use crate::instruction::InstructionRef;

/// Errors raised by graph construction and mutation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IrError {
    /// An operator rejected its input shapes or attributes.
    #[error("{op}: {message}")]
    Shape { op: String, message: String },

    /// A handle does not name a live instruction of this module.
    #[error("instruction {0} does not belong to module `{1}`")]
    UnknownInstruction(InstructionRef, String),

    /// The instruction still has users and cannot be removed.
    #[error("cannot remove {ins}: still used by {users} instruction(s)")]
    StillInUse { ins: InstructionRef, users: usize },

    /// An input would be used before it is defined.
    #[error("{ins} uses {input} before it is defined")]
    UseBeforeDef {
        ins: InstructionRef,
        input: InstructionRef,
    },

    /// A rewrite would make an instruction depend on itself.
    #[error("rewriting {0} would create a cycle")]
    Cycle(InstructionRef),

    /// A parameter with this name already exists.
    #[error("duplicate parameter `{0}`")]
    DuplicateParameter(String),

    /// No parameter with this name exists.
    #[error("unknown parameter `{0}`")]
    UnknownParameter(String),

    /// `@return` is only legal once, as the final instruction.
    #[error("module `{0}`: @return must be the single final instruction")]
    MisplacedReturn(String),

    /// A module handle or name does not resolve.
    #[error("unknown module `{0}`")]
    UnknownModule(String),

    /// A module is still referenced by a control-flow instruction.
    #[error("module `{module}` is still referenced by an instruction in `{user}`")]
    ModuleInUse { module: String, user: String },

    /// A control-flow reference would make modules call each other in a loop.
    #[error("module `{user}` cannot reference `{module}`, which already reaches it")]
    RecursiveModule { module: String, user: String },

    /// Module names must be unique within a program.
    #[error("duplicate module `{0}`")]
    DuplicateModule(String),

    /// A serialized record cannot be turned back into a graph.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// `Module::validate` found a broken invariant.
    #[error("module `{module}` is invalid: {message}")]
    Invalid { module: String, message: String },
}

impl IrError {
    /// Shorthand for a shape-inference failure of operator `op`.
    pub fn shape(op: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Shape {
            op: op.into(),
            message: message.into(),
        }
    }
}
