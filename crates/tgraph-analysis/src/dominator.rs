//! Dominator analysis over the def-use DAG of a module.
//!
//! Edges run from an instruction to its inputs, so `a` dominates `b` when
//! every dependency chain from `b` towards the module's leaves passes
//! through `a`. The analysis is a single pass in definition order: an
//! instruction inherits the dominator set of a single input, or the
//! intersection of the sets of several inputs.

use std::collections::{BTreeSet, HashMap};

use tgraph_ir::{InstructionRef, Module};

/// Immediate-dominator relation of one module.
///
/// Derived data: recompute it after mutating the module.
#[derive(Clone, Debug, Default)]
pub struct DominatorInfo {
    idom: HashMap<InstructionRef, InstructionRef>,
}

impl DominatorInfo {
    /// The immediate dominator of `ins`; `None` for roots.
    pub fn immediate_dominator(&self, ins: InstructionRef) -> Option<InstructionRef> {
        self.idom.get(&ins).copied()
    }

    /// Returns `true` if `a` appears on the immediate-dominator chain of `b`
    /// (`a != b`).
    pub fn strictly_dominate(&self, a: InstructionRef, b: InstructionRef) -> bool {
        let mut cur = self.immediate_dominator(b);
        while let Some(d) = cur {
            if d == a {
                return true;
            }
            cur = self.immediate_dominator(d);
        }
        false
    }

    pub fn dominate(&self, a: InstructionRef, b: InstructionRef) -> bool {
        a == b || self.strictly_dominate(a, b)
    }
}

/// Dominators with children = inputs, visiting instructions in order.
pub fn compute_dominator(module: &Module) -> DominatorInfo {
    compute_generic(module.iter(), |ins| module[ins].inputs())
}

/// Post-dominators: children = users, visiting instructions in reverse.
pub fn compute_post_dominator(module: &Module) -> DominatorInfo {
    compute_generic(module.iter().rev(), |ins| module[ins].outputs())
}

fn compute_generic<'m>(
    order: impl Iterator<Item = InstructionRef>,
    children: impl Fn(InstructionRef) -> &'m [InstructionRef],
) -> DominatorInfo {
    let mut doms: HashMap<InstructionRef, BTreeSet<InstructionRef>> = HashMap::new();
    let mut info = DominatorInfo::default();
    for ins in order {
        let kids = children(ins);
        let mut set = match kids {
            [] => BTreeSet::new(),
            [child] => {
                info.idom.insert(ins, *child);
                doms.get(child).cloned().unwrap_or_default()
            }
            [first, rest @ ..] => {
                let mut common = doms.get(first).cloned().unwrap_or_default();
                for child in rest {
                    if let Some(d) = doms.get(child) {
                        common.retain(|c| d.contains(c));
                    } else {
                        common.clear();
                    }
                }
                // The closest candidate dominates none of the others.
                let closest = common.iter().copied().find(|&c| {
                    common
                        .iter()
                        .all(|&other| other == c || !doms.get(&other).is_some_and(|d| d.contains(&c)))
                });
                if let Some(c) = closest {
                    info.idom.insert(ins, c);
                }
                common
            }
        };
        set.insert(ins);
        doms.insert(ins, set);
    }
    info
}
