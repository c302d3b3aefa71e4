//! Text dump of modules and programs.
//!
//! Instructions are labelled `@N` by their position in the module order, so
//! the dump of a module is stable regardless of arena history.

use std::collections::HashMap;
use std::fmt;

use crate::instruction::InstructionRef;
use crate::module::{Module, ModuleRef};
use crate::operator::Operator;
use crate::program::Program;

/// Produces a human-readable text dump of a [`Module`].
pub fn dump_module(module: &Module) -> String {
    let mut out = String::new();
    write_module(&mut out, module, &|m| format!("{m:?}"));
    out
}

/// Dumps every module of a program, sub-modules first.
pub fn dump_program(program: &Program) -> String {
    let mut out = String::new();
    let resolve = |m: ModuleRef| {
        program
            .try_module(m)
            .map_or_else(|| format!("{m:?}"), |module| module.name().to_owned())
    };
    let mut order = program.reachable_modules();
    let unreachable: Vec<ModuleRef> = program.modules().filter(|m| !order.contains(m)).collect();
    order.extend(unreachable);
    for (i, m) in order.into_iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        write_module(&mut out, &program[m], &resolve);
    }
    out
}

fn write_module(out: &mut String, module: &Module, resolve: &dyn Fn(ModuleRef) -> String) {
    let labels: HashMap<InstructionRef, String> = module
        .iter()
        .enumerate()
        .map(|(pos, ins)| (ins, format!("@{pos}")))
        .collect();
    let label = |ins: &InstructionRef| {
        labels
            .get(ins)
            .cloned()
            .unwrap_or_else(|| format!("<dangling {ins}>"))
    };

    out.push_str(&format!("module: \"{}\"\n", module.name()));
    for ins in module.iter() {
        let node = &module[ins];
        let head = match node.op() {
            Operator::Literal(lit) => format!("@literal{lit}"),
            Operator::Parameter { name, .. } => format!("@param:{name}"),
            op => op.to_string(),
        };
        let mut line = format!("  {} = {head}", label(&ins));
        if !node.inputs().is_empty() {
            let args: Vec<String> = node.inputs().iter().map(label).collect();
            line.push_str(&format!("({})", args.join(",")));
        }
        if !node.module_args().is_empty() {
            let subs: Vec<String> = node.module_args().iter().map(|&m| resolve(m)).collect();
            line.push_str(&format!(", [{}]", subs.join(", ")));
        }
        line.push_str(&format!(" -> {}\n", node.shape()));
        out.push_str(&line);
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&dump_module(self))
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&dump_program(self))
    }
}
