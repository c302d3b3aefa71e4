//! tgraph intermediate representation.
//!
//! An arena-based instruction graph for tensor programs: shapes, operators,
//! instructions, modules and programs, plus a text dump and serializable
//! records. Every mutation keeps the module order topological and the
//! def-use edges symmetric.

pub mod arena;
mod display;
mod error;
mod instruction;
mod literal;
mod module;
mod operator;
mod program;
mod serialize;
mod shape;

pub use arena::{Arena, Handle};
pub use display::{dump_module, dump_program};
pub use error::IrError;
pub use instruction::{Instruction, InstructionRef};
pub use literal::{Literal, float_equal};
pub use module::{Module, ModuleRef};
pub use operator::{OpAttributes, Operator, PadMode};
pub use program::{MAIN_MODULE, Program};
pub use serialize::{InstructionRecord, ModuleRecord, ProgramRecord};
pub use shape::{DynamicDimension, ElementType, Shape, standard_strides};
