//! Pattern matching over the instruction graph.
//!
//! A [`Matcher`] is a predicate over `(module, instruction)` built from small
//! combinators. Matchers can [`bind`](Matcher::bind) the instruction they
//! match to a name; binding the same name twice requires both sites to be the
//! same instruction, which is how patterns express shared operands such as
//! the `x` in `x * sigmoid(1.702 * x)`.
//!
//! ```text
//! name("add").and(arg(0, has_value(0.0)))
//! ```
//!
//! Rules pair a matcher with a rewrite. [`find_matches`] visits each
//! instruction once and applies the first rule that matches it.

use std::collections::HashMap;
use std::ops::Index;
use std::rc::Rc;

use tgraph_ir::{InstructionRef, IrError, Module};

/// Name → instruction bindings collected while matching.
pub type Bindings = HashMap<String, InstructionRef>;

type Predicate = dyn Fn(&Module, InstructionRef, &mut Bindings) -> bool;

/// A composable structural predicate.
#[derive(Clone)]
pub struct Matcher(Rc<Predicate>);

impl std::fmt::Debug for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Matcher")
    }
}

impl Matcher {
    pub fn new(f: impl Fn(&Module, InstructionRef, &mut Bindings) -> bool + 'static) -> Self {
        Self(Rc::new(f))
    }

    /// Tests `ins`, leaving `bindings` untouched when the match fails.
    pub fn matches(&self, module: &Module, ins: InstructionRef, bindings: &mut Bindings) -> bool {
        if !module.has_instruction(ins) {
            return false;
        }
        let snapshot = bindings.clone();
        if (self.0)(module, ins, bindings) {
            true
        } else {
            *bindings = snapshot;
            false
        }
    }

    /// Matches `ins` with fresh bindings.
    pub fn match_instruction(&self, module: &Module, ins: InstructionRef) -> Option<MatchResult> {
        let mut bindings = Bindings::new();
        self.matches(module, ins, &mut bindings)
            .then_some(MatchResult { root: ins, bindings })
    }

    /// Records the matched instruction under `name`.
    ///
    /// Fails if `name` is already bound to a different instruction.
    pub fn bind(self, name: impl Into<String>) -> Self {
        let name = name.into();
        Matcher::new(move |module, ins, bindings| {
            if bindings.get(&name).is_some_and(|&bound| bound != ins) {
                return false;
            }
            if !self.matches(module, ins, bindings) {
                return false;
            }
            bindings.insert(name.clone(), ins);
            true
        })
    }

    /// Both `self` and `other` must match the same instruction.
    pub fn and(self, other: Matcher) -> Self {
        all_of(vec![self, other])
    }

    pub fn or(self, other: Matcher) -> Self {
        any_of(vec![self, other])
    }
}

/// Outcome of a successful match.
#[derive(Clone, Debug)]
pub struct MatchResult {
    pub root: InstructionRef,
    pub bindings: Bindings,
}

impl MatchResult {
    pub fn get(&self, name: &str) -> Option<InstructionRef> {
        self.bindings.get(name).copied()
    }
}

impl Index<&str> for MatchResult {
    type Output = InstructionRef;

    fn index(&self, name: &str) -> &InstructionRef {
        match self.bindings.get(name) {
            Some(ins) => ins,
            None => panic!("no instruction bound to `{name}`"),
        }
    }
}

// ---- leaf predicates ----

/// Matches every instruction.
pub fn any() -> Matcher {
    Matcher::new(|_, _, _| true)
}

/// Matches instructions whose operator is named `n`.
pub fn name(n: &'static str) -> Matcher {
    Matcher::new(move |module, ins, _| module[ins].name() == n)
}

pub fn name_any(names: &'static [&'static str]) -> Matcher {
    Matcher::new(move |module, ins, _| names.contains(&module[ins].name()))
}

/// Matches a constant whose every element equals `value`.
///
/// The instruction does not need to be a literal itself; any subgraph that
/// evaluates to a constant qualifies.
pub fn has_value(value: f64) -> Matcher {
    Matcher::new(move |module, ins, _| {
        module
            .eval(ins)
            .is_some_and(|lit| lit.all_equal(value))
    })
}

/// Matches instructions that evaluate to a constant.
pub fn is_constant() -> Matcher {
    Matcher::new(|module, ins, _| module.eval(ins).is_some())
}

pub fn used_once() -> Matcher {
    Matcher::new(|module, ins, _| module[ins].outputs().len() == 1)
}

pub fn standard_shape() -> Matcher {
    Matcher::new(|module, ins, _| module[ins].shape().standard())
}

/// Matches when the output shape equals the shape of input `i`.
pub fn same_shape_as_input(i: usize) -> Matcher {
    Matcher::new(move |module, ins, _| {
        let node = &module[ins];
        node.inputs()
            .get(i)
            .is_some_and(|&input| module[input].shape() == node.shape())
    })
}

// ---- structural combinators ----

/// Input `i` must match `m`.
pub fn arg(i: usize, m: Matcher) -> Matcher {
    Matcher::new(move |module, ins, bindings| {
        module[ins]
            .inputs()
            .get(i)
            .is_some_and(|&input| m.matches(module, input, bindings))
    })
}

/// Exactly `ms.len()` inputs, matched positionally.
pub fn args(ms: Vec<Matcher>) -> Matcher {
    Matcher::new(move |module, ins, bindings| {
        let inputs = module[ins].inputs();
        inputs.len() == ms.len()
            && inputs
                .iter()
                .zip(&ms)
                .all(|(&input, m)| m.matches(module, input, bindings))
    })
}

/// Inputs `i` and `j` match `m1` and `m2` in either order.
pub fn either_arg(i: usize, j: usize, m1: Matcher, m2: Matcher) -> Matcher {
    let straight = arg(i, m1.clone()).and(arg(j, m2.clone()));
    let swapped = arg(i, m2).and(arg(j, m1));
    straight.or(swapped)
}

/// The first alternative that matches wins; its bindings are kept.
pub fn any_of(ms: Vec<Matcher>) -> Matcher {
    Matcher::new(move |module, ins, bindings| ms.iter().any(|m| m.matches(module, ins, bindings)))
}

pub fn all_of(ms: Vec<Matcher>) -> Matcher {
    Matcher::new(move |module, ins, bindings| {
        let snapshot = bindings.clone();
        if ms.iter().all(|m| m.matches(module, ins, bindings)) {
            true
        } else {
            *bindings = snapshot;
            false
        }
    })
}

pub fn none_of(ms: Vec<Matcher>) -> Matcher {
    Matcher::new(move |module, ins, bindings| {
        let mut scratch = bindings.clone();
        !ms.iter().any(|m| m.matches(module, ins, &mut scratch))
    })
}

/// Looks through `broadcast`/`multibroadcast` views before matching `m`.
pub fn skip_broadcasts(m: Matcher) -> Matcher {
    Matcher::new(move |module, mut ins, bindings| {
        while module[ins].op().attributes().broadcast {
            match module[ins].inputs() {
                [input] => ins = *input,
                _ => break,
            }
        }
        m.matches(module, ins, bindings)
    })
}

// ---- rules ----

/// A rewrite triggered by a pattern.
pub trait Rule {
    fn matcher(&self) -> Matcher;

    /// Rewrites the graph around `result.root`. Returning `Ok(false)` means
    /// the rule bailed out after all.
    fn apply(&self, module: &mut Module, result: &MatchResult) -> Result<bool, IrError>;
}

/// Visits every instruction once, in order, applying the first matching rule.
///
/// Instructions added while sweeping are not visited; instructions removed
/// while sweeping are skipped. Returns the number of rewrites applied.
pub fn find_matches(module: &mut Module, rules: &[&dyn Rule]) -> Result<usize, IrError> {
    let matchers: Vec<Matcher> = rules.iter().map(|r| r.matcher()).collect();
    let order: Vec<InstructionRef> = module.iter().collect();
    let mut applied = 0;
    for ins in order {
        if !module.has_instruction(ins) {
            continue;
        }
        for (rule, m) in rules.iter().zip(&matchers) {
            if let Some(result) = m.match_instruction(module, ins) {
                if rule.apply(module, &result)? {
                    applied += 1;
                }
                break;
            }
        }
    }
    Ok(applied)
}
