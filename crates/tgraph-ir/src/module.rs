//! The mutable instruction graph.
//!
//! A [`Module`] owns its instructions in an arena and keeps a separate
//! ordering that is always a topological order of the def-use DAG. Every
//! mutation either preserves that order or fails without changing the graph.

use std::collections::{HashMap, HashSet};
use std::ops::Index;

use crate::arena::{Arena, Handle};
use crate::error::IrError;
use crate::instruction::{Instruction, InstructionRef};
use crate::literal::Literal;
use crate::operator::Operator;
use crate::shape::Shape;

/// Handle to a module owned by a [`Program`](crate::Program).
pub type ModuleRef = Handle<Module>;

/// An ordered collection of instructions forming one function-like unit.
///
/// Cloning a module produces an independent snapshot with the same handles.
#[derive(Clone, Debug)]
pub struct Module {
    name: String,
    instructions: Arena<Instruction>,
    order: Vec<InstructionRef>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: Arena::new(),
            order: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of instructions.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn has_instruction(&self, ins: InstructionRef) -> bool {
        self.instructions.contains(ins)
    }

    pub fn get(&self, ins: InstructionRef) -> Option<&Instruction> {
        self.instructions.try_get(ins)
    }

    /// Instructions in order; call `.rev()` for reverse traversal.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = InstructionRef> + '_ {
        self.order.iter().copied()
    }

    /// The current order as a slice.
    pub fn instructions(&self) -> &[InstructionRef] {
        &self.order
    }

    pub fn position(&self, ins: InstructionRef) -> Option<usize> {
        self.order.iter().position(|&i| i == ins)
    }

    pub fn last(&self) -> Option<InstructionRef> {
        self.order.last().copied()
    }

    /// The `@return` instruction, if any.
    pub fn get_return(&self) -> Option<InstructionRef> {
        self.last()
            .filter(|&ins| matches!(self[ins].op, Operator::Return))
    }

    /// Returns `true` if `target` is `ins` or one of its transitive inputs.
    pub fn depends_on(&self, ins: InstructionRef, target: InstructionRef) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![ins];
        while let Some(cur) = stack.pop() {
            if cur == target {
                return true;
            }
            if visited.insert(cur)
                && let Some(node) = self.get(cur)
            {
                stack.extend(node.inputs.iter().copied());
            }
        }
        false
    }

    /// Sub-modules referenced by any instruction, in first-use order.
    pub fn sub_modules(&self) -> Vec<ModuleRef> {
        let mut seen = Vec::new();
        for ins in self.iter() {
            for &m in &self[ins].module_args {
                if !seen.contains(&m) {
                    seen.push(m);
                }
            }
        }
        seen
    }

    // ---- construction ----

    /// Appends an instruction.
    pub fn add_instruction(
        &mut self,
        op: Operator,
        inputs: impl Into<Vec<InstructionRef>>,
    ) -> Result<InstructionRef, IrError> {
        self.insert_at(self.order.len(), op, inputs.into(), Vec::new(), Vec::new())
    }

    /// Inserts an instruction immediately before `before`.
    ///
    /// Fails with [`IrError::Shape`] if the operator rejects the input shapes
    /// and with [`IrError::UseBeforeDef`] if an input does not precede
    /// `before`. The graph is unchanged on failure.
    pub fn insert_instruction(
        &mut self,
        before: InstructionRef,
        op: Operator,
        inputs: impl Into<Vec<InstructionRef>>,
    ) -> Result<InstructionRef, IrError> {
        let pos = self.pos(before)?;
        self.insert_at(pos, op, inputs.into(), Vec::new(), Vec::new())
    }

    /// Inserts a control-flow instruction; `module_outputs` are the output
    /// shapes of `module_args`, resolved by the owning program.
    pub(crate) fn insert_with_modules(
        &mut self,
        before: Option<InstructionRef>,
        op: Operator,
        inputs: Vec<InstructionRef>,
        module_args: Vec<ModuleRef>,
        module_outputs: Vec<Vec<Shape>>,
    ) -> Result<InstructionRef, IrError> {
        let pos = match before {
            Some(before) => self.pos(before)?,
            None => self.order.len(),
        };
        self.insert_at(pos, op, inputs, module_args, module_outputs)
    }

    /// Adds a named external input after the existing parameters.
    pub fn add_parameter(
        &mut self,
        name: impl Into<String>,
        shape: Shape,
    ) -> Result<InstructionRef, IrError> {
        let pos = self
            .order
            .iter()
            .rposition(|&i| self[i].param_name().is_some())
            .map_or(0, |p| p + 1);
        let op = Operator::Parameter {
            name: name.into(),
            shape,
        };
        self.insert_at(pos, op, Vec::new(), Vec::new(), Vec::new())
    }

    /// Adds a constant at the front of the module.
    pub fn add_literal(&mut self, literal: Literal) -> InstructionRef {
        let shape = literal.shape().clone();
        let node = Instruction::new(
            Operator::Literal(literal),
            Vec::new(),
            shape,
            Vec::new(),
            Vec::new(),
        );
        let ins = self.instructions.append(node);
        self.order.insert(0, ins);
        ins
    }

    /// Appends the single `@return` instruction.
    pub fn add_return(
        &mut self,
        outputs: impl Into<Vec<InstructionRef>>,
    ) -> Result<InstructionRef, IrError> {
        self.insert_at(
            self.order.len(),
            Operator::Return,
            outputs.into(),
            Vec::new(),
            Vec::new(),
        )
    }

    /// Replaces the outputs of `@return`, adding one if missing.
    pub fn replace_return(
        &mut self,
        outputs: impl Into<Vec<InstructionRef>>,
    ) -> Result<InstructionRef, IrError> {
        match self.get_return() {
            Some(ret) => self.replace_instruction(ret, Operator::Return, outputs),
            None => self.add_return(outputs),
        }
    }

    pub fn get_parameter(&self, name: &str) -> Option<InstructionRef> {
        self.iter().find(|&i| self[i].param_name() == Some(name))
    }

    pub fn get_parameter_names(&self) -> Vec<String> {
        self.iter()
            .filter_map(|i| self[i].param_name().map(str::to_owned))
            .collect()
    }

    /// `(name, shape)` of every parameter, in order.
    pub fn get_parameter_shapes(&self) -> Vec<(String, Shape)> {
        self.iter()
            .filter_map(|i| match &self[i].op {
                Operator::Parameter { name, shape } => Some((name.clone(), shape.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn rename_parameter(&mut self, old: &str, new: &str) -> Result<(), IrError> {
        let ins = self
            .get_parameter(old)
            .ok_or_else(|| IrError::UnknownParameter(old.to_owned()))?;
        if old != new && self.get_parameter(new).is_some() {
            return Err(IrError::DuplicateParameter(new.to_owned()));
        }
        if let Operator::Parameter { name, .. } = &mut self.instructions[ins].op {
            *name = new.to_owned();
        }
        Ok(())
    }

    /// Output shapes: the inputs of `@return`, or the last instruction's shape.
    pub fn get_output_shapes(&self) -> Vec<Shape> {
        match self.get_return() {
            Some(ret) => self[ret]
                .inputs
                .iter()
                .map(|&i| self[i].shape.clone())
                .collect(),
            None => self
                .last()
                .map(|i| vec![self[i].shape.clone()])
                .unwrap_or_default(),
        }
    }

    // ---- mutation ----

    /// Rewrites `old` in place with a new operator and inputs.
    ///
    /// Def-use edges are updated on both the old and new inputs, and only
    /// `old`'s own shape is recomputed. If a new input is defined after `old`,
    /// `old` and its users in between are sunk after that input.
    pub fn replace_instruction(
        &mut self,
        old: InstructionRef,
        op: Operator,
        inputs: impl Into<Vec<InstructionRef>>,
    ) -> Result<InstructionRef, IrError> {
        self.check(old)?;
        let inputs = inputs.into();
        for &input in &inputs {
            self.check(input)?;
            if self.depends_on(input, old) {
                return Err(IrError::Cycle(old));
            }
        }
        if matches!(op, Operator::Return) != matches!(self[old].op, Operator::Return) {
            return Err(IrError::MisplacedReturn(self.name.clone()));
        }
        if let Operator::Parameter { name, .. } = &op
            && self.get_parameter(name).is_some_and(|p| p != old)
        {
            return Err(IrError::DuplicateParameter(name.clone()));
        }
        let (module_args, module_outputs) = if op.uses_modules() {
            let node = &self[old];
            (node.module_args.clone(), node.module_outputs.clone())
        } else {
            (Vec::new(), Vec::new())
        };
        let shape = op.compute_shape(&self.input_shapes(&inputs), &module_outputs)?;

        for input in std::mem::take(&mut self.instructions[old].inputs) {
            self.instructions[input].remove_output(old);
        }
        for &input in &inputs {
            self.instructions[input].add_output(old);
        }
        let anchor = self.latest(&inputs);
        let node = &mut self.instructions[old];
        node.op = op;
        node.inputs = inputs;
        node.shape = shape;
        node.module_args = module_args;
        node.module_outputs = module_outputs;

        if let Some(anchor) = anchor
            && self.position(anchor) > self.position(old)
        {
            self.sink_after(anchor, &[old]);
        }
        Ok(old)
    }

    /// Redirects every user of `old` (other than `new` itself) to `new`.
    ///
    /// Users get their own shapes recomputed. Users defined before `new`
    /// are sunk after it. If `old` is the module's final output (the last
    /// instruction, with no `@return`), it becomes `identity(new)` so the
    /// output stays in place. Returns the instruction now producing the value.
    pub fn replace_instruction_with(
        &mut self,
        old: InstructionRef,
        new: InstructionRef,
    ) -> Result<InstructionRef, IrError> {
        self.check(old)?;
        self.check(new)?;
        if old == new {
            return Ok(new);
        }
        if matches!(self[old].op, Operator::Return) {
            return Err(IrError::MisplacedReturn(self.name.clone()));
        }
        if self.last() == Some(old) {
            return self.replace_instruction(old, Operator::Identity, vec![new]);
        }

        let users: Vec<InstructionRef> = self[old]
            .outputs
            .iter()
            .copied()
            .filter(|&u| u != new)
            .collect();
        let mut rewired = Vec::with_capacity(users.len());
        for &user in &users {
            if self.depends_on(new, user) {
                return Err(IrError::Cycle(user));
            }
            let node = &self[user];
            let inputs: Vec<InstructionRef> = node
                .inputs
                .iter()
                .map(|&i| if i == old { new } else { i })
                .collect();
            let shape = node
                .op
                .compute_shape(&self.input_shapes(&inputs), &node.module_outputs)?;
            rewired.push((user, inputs, shape));
        }
        for (user, inputs, shape) in rewired {
            self.instructions[old].remove_output(user);
            self.instructions[new].add_output(user);
            let node = &mut self.instructions[user];
            node.inputs = inputs;
            node.shape = shape;
        }

        let new_pos = self.position(new);
        let early: Vec<InstructionRef> = users
            .into_iter()
            .filter(|&u| self.position(u) < new_pos)
            .collect();
        if !early.is_empty() {
            self.sink_after(new, &early);
        }
        Ok(new)
    }

    /// Deletes an instruction that has no users.
    pub fn remove_instruction(&mut self, ins: InstructionRef) -> Result<(), IrError> {
        self.check(ins)?;
        let users = self[ins].outputs.len();
        if users > 0 {
            return Err(IrError::StillInUse { ins, users });
        }
        self.clear_inputs(ins)?;
        self.order.retain(|&i| i != ins);
        self.instructions.remove(ins);
        Ok(())
    }

    /// Erases every instruction after `last`, returning how many were removed.
    pub fn remove_after(&mut self, last: InstructionRef) -> Result<usize, IrError> {
        let pos = self.pos(last)?;
        let tail = self.order.split_off(pos + 1);
        for &ins in &tail {
            self.clear_inputs(ins)?;
        }
        for &ins in &tail {
            let users = std::mem::take(&mut self.instructions[ins].outputs);
            for user in users {
                if let Some(node) = self.instructions.try_get_mut(user) {
                    node.inputs.retain(|&i| i != ins);
                }
            }
            self.instructions.remove(ins);
        }
        Ok(tail.len())
    }

    /// Unlinks `ins` from its inputs, leaving it with none.
    ///
    /// The cached shape is left as is; callers are expected to remove the
    /// instruction afterwards.
    pub fn clear_inputs(&mut self, ins: InstructionRef) -> Result<(), IrError> {
        self.check(ins)?;
        for input in std::mem::take(&mut self.instructions[ins].inputs) {
            if let Some(node) = self.instructions.try_get_mut(input) {
                node.remove_output(ins);
            }
        }
        Ok(())
    }

    /// Moves `ins` immediately before `before` without touching edges.
    ///
    /// The caller is responsible for keeping the order topological.
    pub fn move_instruction(
        &mut self,
        ins: InstructionRef,
        before: InstructionRef,
    ) -> Result<(), IrError> {
        self.check(ins)?;
        self.check(before)?;
        if ins == before {
            return Ok(());
        }
        self.order.retain(|&i| i != ins);
        let pos = self.pos(before)?;
        self.order.insert(pos, ins);
        Ok(())
    }

    /// Moves `ins` to the end of the order without touching edges.
    pub fn move_to_end(&mut self, ins: InstructionRef) -> Result<(), IrError> {
        self.check(ins)?;
        self.order.retain(|&i| i != ins);
        self.order.push(ins);
        Ok(())
    }

    // ---- evaluation and checking ----

    /// Evaluates `ins` if all of its transitive inputs are literals and every
    /// operator on the way can be computed.
    pub fn eval(&self, ins: InstructionRef) -> Option<Literal> {
        self.eval_cached(ins, &mut HashMap::new())
    }

    /// [`Module::eval`] with a caller-provided memo shared across calls.
    pub fn eval_cached(
        &self,
        ins: InstructionRef,
        cache: &mut HashMap<InstructionRef, Option<Literal>>,
    ) -> Option<Literal> {
        if let Some(value) = cache.get(&ins) {
            return value.clone();
        }
        let node = self.get(ins)?;
        let value = match &node.op {
            Operator::Literal(lit) => Some(lit.clone()),
            _ if node.inputs.is_empty() || node.shape.is_tuple() || node.shape.dynamic_shape() => {
                None
            }
            op => {
                let args: Option<Vec<Literal>> = node
                    .inputs
                    .iter()
                    .map(|&i| self.eval_cached(i, cache))
                    .collect();
                args.and_then(|args| {
                    let refs: Vec<&Literal> = args.iter().collect();
                    op.compute(&node.shape, &refs)
                })
            }
        };
        cache.insert(ins, value.clone());
        value
    }

    /// Checks every structural invariant of the module.
    ///
    /// Verifies topological order, def-use symmetry, `@return` placement and
    /// that each cached shape agrees with its operator's shape rule.
    pub fn validate(&self) -> Result<(), IrError> {
        let invalid = |message: String| IrError::Invalid {
            module: self.name.clone(),
            message,
        };
        if self.order.len() != self.instructions.len() {
            return Err(invalid(format!(
                "order lists {} instructions but {} are live",
                self.order.len(),
                self.instructions.len()
            )));
        }
        let mut seen = HashSet::new();
        for (pos, &ins) in self.order.iter().enumerate() {
            let node = self
                .get(ins)
                .ok_or_else(|| invalid(format!("{ins} is listed but not live")))?;
            for &input in &node.inputs {
                if !seen.contains(&input) {
                    return Err(invalid(format!("{ins} uses {input} before it is defined")));
                }
                if !self[input].outputs.contains(&ins) {
                    return Err(invalid(format!("{input} does not list user {ins}")));
                }
            }
            for &user in &node.outputs {
                if !self.get(user).is_some_and(|u| u.inputs.contains(&ins)) {
                    return Err(invalid(format!("{ins} lists {user} as a user but is not its input")));
                }
            }
            if matches!(node.op, Operator::Return) && pos + 1 != self.order.len() {
                return Err(invalid(format!("@return {ins} is not the last instruction")));
            }
            if node.inputs.is_empty() && node.op.is_builtin() {
                seen.insert(ins);
                continue;
            }
            let shape = node
                .op
                .compute_shape(&self.input_shapes(&node.inputs), &node.module_outputs)
                .map_err(|e| invalid(format!("{ins}: {e}")))?;
            if shape != node.shape {
                return Err(invalid(format!(
                    "{ins} caches {{{}}} but {} computes {{{shape}}}",
                    node.shape,
                    node.op.name()
                )));
            }
            seen.insert(ins);
        }
        Ok(())
    }

    // ---- internals ----

    fn check(&self, ins: InstructionRef) -> Result<(), IrError> {
        if self.has_instruction(ins) {
            Ok(())
        } else {
            Err(IrError::UnknownInstruction(ins, self.name.clone()))
        }
    }

    fn pos(&self, ins: InstructionRef) -> Result<usize, IrError> {
        self.position(ins)
            .ok_or_else(|| IrError::UnknownInstruction(ins, self.name.clone()))
    }

    fn input_shapes(&self, inputs: &[InstructionRef]) -> Vec<Shape> {
        inputs.iter().map(|&i| self[i].shape.clone()).collect()
    }

    /// The input defined last in the order.
    fn latest(&self, inputs: &[InstructionRef]) -> Option<InstructionRef> {
        inputs.iter().copied().max_by_key(|&i| self.position(i))
    }

    fn insert_at(
        &mut self,
        pos: usize,
        op: Operator,
        inputs: Vec<InstructionRef>,
        module_args: Vec<ModuleRef>,
        module_outputs: Vec<Vec<Shape>>,
    ) -> Result<InstructionRef, IrError> {
        let has_return = self.get_return().is_some();
        match &op {
            Operator::Return if pos != self.order.len() || has_return => {
                return Err(IrError::MisplacedReturn(self.name.clone()));
            }
            Operator::Parameter { name, .. } if self.get_parameter(name).is_some() => {
                return Err(IrError::DuplicateParameter(name.clone()));
            }
            _ if has_return && pos == self.order.len() => {
                return Err(IrError::MisplacedReturn(self.name.clone()));
            }
            _ => {}
        }
        let ins = self.instructions.next_handle();
        for &input in &inputs {
            let input_pos = self.pos(input)?;
            if input_pos >= pos {
                return Err(IrError::UseBeforeDef { ins, input });
            }
        }
        let shape = op.compute_shape(&self.input_shapes(&inputs), &module_outputs)?;
        let node = Instruction::new(op, inputs.clone(), shape, module_args, module_outputs);
        let ins = self.instructions.append(node);
        for input in inputs {
            self.instructions[input].add_output(ins);
        }
        self.order.insert(pos, ins);
        log::trace!("{}: inserted {ins} at {pos}", self.name);
        Ok(ins)
    }

    /// Moves every instruction before `anchor` that transitively uses one of
    /// `roots` to just after `anchor`, keeping their relative order.
    fn sink_after(&mut self, anchor: InstructionRef, roots: &[InstructionRef]) {
        let positions: HashMap<InstructionRef, usize> = self
            .order
            .iter()
            .enumerate()
            .map(|(p, &i)| (i, p))
            .collect();
        let Some(&anchor_pos) = positions.get(&anchor) else {
            return;
        };
        let before_anchor = |i: &InstructionRef| positions.get(i).is_some_and(|&p| p < anchor_pos);
        let mut moving = HashSet::new();
        let mut stack: Vec<InstructionRef> =
            roots.iter().copied().filter(|r| before_anchor(r)).collect();
        while let Some(ins) = stack.pop() {
            if moving.insert(ins) {
                stack.extend(self[ins].outputs.iter().copied().filter(|u| before_anchor(u)));
            }
        }
        let (moved, mut kept): (Vec<_>, Vec<_>) =
            self.order.iter().copied().partition(|i| moving.contains(i));
        let at = kept
            .iter()
            .position(|&i| i == anchor)
            .map_or(kept.len(), |p| p + 1);
        kept.splice(at..at, moved);
        self.order = kept;
    }
}

impl Index<InstructionRef> for Module {
    type Output = Instruction;

    fn index(&self, ins: InstructionRef) -> &Instruction {
        &self.instructions[ins]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::ElementType;

    fn f32s(lens: &[usize]) -> Shape {
        Shape::new(ElementType::Float, lens.to_vec())
    }

    fn chain() -> (Module, [InstructionRef; 4]) {
        let mut m = Module::new("main");
        let x = m.add_parameter("x", f32s(&[4])).unwrap();
        let a = m.add_instruction(Operator::Relu, vec![x]).unwrap();
        let b = m.add_instruction(Operator::Neg, vec![a]).unwrap();
        let c = m.add_instruction(Operator::Exp, vec![x]).unwrap();
        (m, [x, a, b, c])
    }

    #[test]
    fn insert_wires_def_use() {
        let (m, [x, a, b, c]) = chain();
        assert_eq!(m[x].outputs(), &[a, c]);
        assert_eq!(m[a].inputs(), &[x]);
        assert_eq!(m[a].outputs(), &[b]);
        m.validate().unwrap();
    }

    #[test]
    fn insert_before_position() {
        let (mut m, [x, a, ..]) = chain();
        let s = m.insert_instruction(a, Operator::Sqrt, vec![x]).unwrap();
        assert_eq!(m.position(s), Some(1));
        assert_eq!(m.position(a), Some(2));
    }

    #[test]
    fn insert_rejects_use_before_def() {
        let (mut m, [_, a, b, _]) = chain();
        let err = m.insert_instruction(a, Operator::Neg, vec![b]).unwrap_err();
        assert!(matches!(err, IrError::UseBeforeDef { input, .. } if input == b));
        assert_eq!(m.len(), 4);
    }

    #[test]
    fn insert_rejects_bad_shapes() {
        let mut m = Module::new("main");
        let x = m.add_parameter("x", f32s(&[4])).unwrap();
        let y = m.add_parameter("y", f32s(&[5])).unwrap();
        let err = m.add_instruction(Operator::Add, vec![x, y]).unwrap_err();
        assert!(matches!(err, IrError::Shape { ref op, .. } if op == "add"));
        assert_eq!(m.len(), 2);
        assert!(m[x].outputs().is_empty());
    }

    #[test]
    fn parameters_keep_insertion_order() {
        let mut m = Module::new("main");
        let lit = m.add_literal(Literal::scalar(ElementType::Float, 1.0));
        m.add_parameter("x", f32s(&[1])).unwrap();
        m.add_parameter("y", f32s(&[1])).unwrap();
        assert_eq!(m.get_parameter_names(), vec!["x", "y"]);
        assert_eq!(m.position(lit), Some(2));
        let err = m.add_parameter("x", f32s(&[1])).unwrap_err();
        assert_eq!(err, IrError::DuplicateParameter("x".into()));
    }

    #[test]
    fn literals_go_to_front() {
        let (mut m, _) = chain();
        let lit = m.add_literal(Literal::scalar(ElementType::Float, 2.0));
        assert_eq!(m.position(lit), Some(0));
    }

    #[test]
    fn rename_parameter() {
        let (mut m, [x, ..]) = chain();
        m.rename_parameter("x", "input").unwrap();
        assert_eq!(m.get_parameter("input"), Some(x));
        assert!(m.get_parameter("x").is_none());
        assert_eq!(
            m.rename_parameter("missing", "y"),
            Err(IrError::UnknownParameter("missing".into()))
        );
    }

    #[test]
    fn return_must_be_last_and_unique() {
        let (mut m, [_, _, b, c]) = chain();
        m.add_return(vec![b, c]).unwrap();
        assert!(matches!(m.add_return(vec![b]), Err(IrError::MisplacedReturn(_))));
        assert!(matches!(
            m.add_instruction(Operator::Neg, vec![b]),
            Err(IrError::MisplacedReturn(_))
        ));
        let shapes = m.get_output_shapes();
        assert_eq!(shapes, vec![f32s(&[4]), f32s(&[4])]);
    }

    #[test]
    fn replace_return_outputs() {
        let (mut m, [x, a, b, _]) = chain();
        let ret = m.add_return(vec![b]).unwrap();
        m.replace_return(vec![a, x]).unwrap();
        assert_eq!(m[ret].inputs(), &[a, x]);
        assert!(m[b].outputs().is_empty());
        m.validate().unwrap();
    }

    #[test]
    fn output_shapes_without_return() {
        let (m, _) = chain();
        assert_eq!(m.get_output_shapes(), vec![f32s(&[4])]);
    }

    #[test]
    fn remove_with_users_fails() {
        let (mut m, [_, a, b, _]) = chain();
        assert_eq!(
            m.remove_instruction(a),
            Err(IrError::StillInUse { ins: a, users: 1 })
        );
        m.remove_instruction(b).unwrap();
        assert!(m[a].outputs().is_empty());
        m.remove_instruction(a).unwrap();
        assert!(!m.has_instruction(a));
        m.validate().unwrap();
    }

    #[test]
    fn replace_in_place_sinks_after_new_input() {
        let (mut m, [x, a, b, c]) = chain();
        m.replace_instruction(a, Operator::Add, vec![c, x]).unwrap();
        assert_eq!(m.instructions(), &[x, c, a, b]);
        assert_eq!(m[c].outputs(), &[a]);
        m.validate().unwrap();
    }

    #[test]
    fn replace_in_place_rejects_cycles() {
        let (mut m, [_, a, b, _]) = chain();
        assert_eq!(
            m.replace_instruction(a, Operator::Exp, vec![b]),
            Err(IrError::Cycle(a))
        );
        m.validate().unwrap();
    }

    #[test]
    fn replace_in_place_keeps_graph_on_shape_error() {
        let (mut m, [x, a, ..]) = chain();
        let y = m.add_parameter("y", f32s(&[2])).unwrap();
        assert!(m.replace_instruction(a, Operator::Add, vec![x, y]).is_err());
        assert_eq!(m[a].op(), &Operator::Relu);
        assert!(m[y].outputs().is_empty());
        m.validate().unwrap();
    }

    #[test]
    fn replace_with_redirects_users() {
        let (mut m, [x, a, b, c]) = chain();
        assert_eq!(m.replace_instruction_with(a, c).unwrap(), c);
        assert_eq!(m[b].inputs(), &[c]);
        assert!(m[a].outputs().is_empty());
        assert_eq!(m.instructions(), &[x, a, c, b]);
        m.validate().unwrap();
    }

    #[test]
    fn replace_with_skips_the_replacement_itself() {
        let (mut m, [x, a, b, _]) = chain();
        let contig = m.insert_instruction(b, Operator::Contiguous, vec![a]).unwrap();
        m.replace_instruction_with(a, contig).unwrap();
        assert_eq!(m[contig].inputs(), &[a]);
        assert_eq!(m[b].inputs(), &[contig]);
        assert_eq!(m.instructions()[..2], [x, a]);
        m.validate().unwrap();
    }

    #[test]
    fn replacing_final_output_inserts_identity() {
        let (mut m, [x, _, _, c]) = chain();
        let out = m.replace_instruction_with(c, x).unwrap();
        assert_eq!(out, c);
        assert_eq!(m[c].op(), &Operator::Identity);
        assert_eq!(m[c].inputs(), &[x]);
        assert_eq!(m.last(), Some(c));
    }

    #[test]
    fn move_and_remove_after() {
        let (mut m, [x, a, b, c]) = chain();
        m.clear_inputs(c).unwrap();
        m.move_to_end(c).unwrap();
        m.move_instruction(c, b).unwrap();
        assert_eq!(m.instructions(), &[x, a, c, b]);
        m.move_to_end(c).unwrap();
        assert_eq!(m.remove_after(b).unwrap(), 1);
        assert!(!m.has_instruction(c));
        assert_eq!(m[x].outputs(), &[a]);
        m.validate().unwrap();
    }

    #[test]
    fn validate_detects_broken_order() {
        let (mut m, [x, a, ..]) = chain();
        m.move_instruction(a, x).unwrap();
        let err = m.validate().unwrap_err();
        assert!(err.to_string().contains("before it is defined"));
    }

    #[test]
    fn eval_constant_subgraph() {
        let mut m = Module::new("main");
        let a = m.add_literal(Literal::new(f32s(&[2]), vec![1.0, 4.0]));
        let b = m.add_literal(Literal::new(f32s(&[2]), vec![2.0, 2.0]));
        let prod = m.add_instruction(Operator::Mul, vec![a, b]).unwrap();
        let root = m.add_instruction(Operator::Sqrt, vec![prod]).unwrap();
        let lit = m.eval(root).unwrap();
        assert!((lit.data()[0] - 2f64.sqrt()).abs() < 1e-6);
        assert!((lit.data()[1] - 8f64.sqrt()).abs() < 1e-6);

        let x = m.add_parameter("x", f32s(&[2])).unwrap();
        let y = m.add_instruction(Operator::Add, vec![x, a]).unwrap();
        assert!(m.eval(y).is_none());
    }

    #[test]
    fn clone_is_independent() {
        let (m, [_, a, b, _]) = chain();
        let mut copy = m.clone();
        copy.remove_instruction(b).unwrap();
        assert!(m.has_instruction(b));
        assert_eq!(m[a].outputs(), &[b]);
    }

    #[test]
    fn depends_on_is_transitive() {
        let (m, [x, a, b, c]) = chain();
        assert!(m.depends_on(b, x));
        assert!(m.depends_on(b, a));
        assert!(!m.depends_on(c, a));
    }
}
