//! Operator set: typed attributes, shape inference and constant evaluation.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::IrError;
use crate::literal::Literal;
use crate::shape::{ElementType, Shape, standard_strides};

/// How `pad` fills the border.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PadMode {
    #[default]
    Constant,
    Reflect,
    Edge,
}

/// Properties of an operator consulted by generic passes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpAttributes {
    /// Computes each output element from the same-index input elements.
    pub pointwise: bool,
    /// Kernels for this operator expect standard-layout inputs.
    pub requires_standard_inputs: bool,
    /// A view that only changes strides (`broadcast`, `multibroadcast`).
    pub broadcast: bool,
    /// May be deleted by dead-code elimination even when its output is empty.
    pub removable_when_empty: bool,
}

/// An operator: what an instruction computes.
///
/// Compared and hashed structurally by name and attributes. Serialized as
/// `{"operator": <name>, "attributes": {...}}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operator", content = "attributes", rename_all = "snake_case")]
pub enum Operator {
    #[serde(rename = "@literal")]
    Literal(Literal),
    #[serde(rename = "@param")]
    Parameter { name: String, shape: Shape },
    #[serde(rename = "@return")]
    Return,
    Identity,
    Undefined,
    Allocate { shape: Shape },
    Contiguous,
    Convert { target_type: ElementType },

    Neg,
    Exp,
    Sqrt,
    Erf,
    Tanh,
    Sigmoid,
    Relu,
    Nearbyint,
    Recip,

    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Max,
    Min,

    /// `clip(x, min, max)`.
    Clip,
    Transpose { permutation: Vec<usize> },
    /// `0` copies the input dimension, `-1` is inferred.
    Reshape { dims: Vec<i64> },
    Broadcast { axis: usize, out_lens: Vec<usize> },
    Multibroadcast { out_lens: Vec<usize> },
    /// `pads` holds all begin paddings followed by all end paddings.
    Pad {
        pads: Vec<usize>,
        #[serde(default)]
        mode: PadMode,
        #[serde(default)]
        value: f64,
    },
    /// `padding` holds begin paddings then end paddings of the spatial axes.
    Convolution {
        padding: Vec<usize>,
        stride: Vec<usize>,
        dilation: Vec<usize>,
        group: usize,
    },
    Dot,
    ReduceMean { axes: Vec<usize> },
    /// Normalizes over the last axis.
    Layernorm { epsilon: f64 },
    #[serde(rename = "quantizelinear")]
    QuantizeLinear,
    #[serde(rename = "dequantizelinear")]
    DequantizeLinear,

    /// `if(cond)` with `[then, else]` sub-modules.
    If,
    /// `loop(trip_count, cond, carried...)` with a `[body]` sub-module.
    Loop { max_iterations: usize },
    GetTupleElem { index: usize },
}

impl Operator {
    /// A 2-D convolution with no padding, unit stride and dilation.
    pub fn convolution_2d() -> Self {
        Self::Convolution {
            padding: vec![0; 4],
            stride: vec![1, 1],
            dilation: vec![1, 1],
            group: 1,
        }
    }

    /// A zero-filling `pad`.
    pub fn pad(pads: impl Into<Vec<usize>>) -> Self {
        Self::Pad {
            pads: pads.into(),
            mode: PadMode::Constant,
            value: 0.0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Literal(_) => "@literal",
            Self::Parameter { .. } => "@param",
            Self::Return => "@return",
            Self::Identity => "identity",
            Self::Undefined => "undefined",
            Self::Allocate { .. } => "allocate",
            Self::Contiguous => "contiguous",
            Self::Convert { .. } => "convert",
            Self::Neg => "neg",
            Self::Exp => "exp",
            Self::Sqrt => "sqrt",
            Self::Erf => "erf",
            Self::Tanh => "tanh",
            Self::Sigmoid => "sigmoid",
            Self::Relu => "relu",
            Self::Nearbyint => "nearbyint",
            Self::Recip => "recip",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Pow => "pow",
            Self::Max => "max",
            Self::Min => "min",
            Self::Clip => "clip",
            Self::Transpose { .. } => "transpose",
            Self::Reshape { .. } => "reshape",
            Self::Broadcast { .. } => "broadcast",
            Self::Multibroadcast { .. } => "multibroadcast",
            Self::Pad { .. } => "pad",
            Self::Convolution { .. } => "convolution",
            Self::Dot => "dot",
            Self::ReduceMean { .. } => "reduce_mean",
            Self::Layernorm { .. } => "layernorm",
            Self::QuantizeLinear => "quantizelinear",
            Self::DequantizeLinear => "dequantizelinear",
            Self::If => "if",
            Self::Loop { .. } => "loop",
            Self::GetTupleElem { .. } => "get_tuple_elem",
        }
    }

    /// Builtins (`@literal`, `@param`, `@return`) are not computations.
    pub fn is_builtin(&self) -> bool {
        self.name().starts_with('@')
    }

    /// Control-flow operators that take sub-modules.
    pub fn uses_modules(&self) -> bool {
        matches!(self, Self::If | Self::Loop { .. })
    }

    pub fn is_unary_pointwise(&self) -> bool {
        matches!(
            self,
            Self::Neg
                | Self::Exp
                | Self::Sqrt
                | Self::Erf
                | Self::Tanh
                | Self::Sigmoid
                | Self::Relu
                | Self::Nearbyint
                | Self::Recip
        )
    }

    pub fn is_binary_pointwise(&self) -> bool {
        matches!(
            self,
            Self::Add | Self::Sub | Self::Mul | Self::Div | Self::Pow | Self::Max | Self::Min
        )
    }

    pub fn attributes(&self) -> OpAttributes {
        OpAttributes {
            pointwise: self.is_unary_pointwise()
                || self.is_binary_pointwise()
                || matches!(self, Self::Convert { .. } | Self::Clip),
            requires_standard_inputs: matches!(
                self,
                Self::Convolution { .. }
                    | Self::Reshape { .. }
                    | Self::Dot
                    | Self::ReduceMean { .. }
                    | Self::Layernorm { .. }
            ),
            broadcast: matches!(self, Self::Broadcast { .. } | Self::Multibroadcast { .. }),
            removable_when_empty: self.is_builtin()
                || matches!(self, Self::Identity | Self::Allocate { .. } | Self::Undefined),
        }
    }

    /// Infers the output shape from input shapes and, for control-flow
    /// operators, the output shapes of the referenced sub-modules.
    ///
    /// Results whose size does not fit in `usize` are rejected.
    pub fn compute_shape(
        &self,
        inputs: &[Shape],
        module_outputs: &[Vec<Shape>],
    ) -> Result<Shape, IrError> {
        let shape = self.infer_shape(inputs, module_outputs)?;
        if !shape.addressable() {
            return Err(IrError::shape(
                self.name(),
                format!("output {{{shape}}} is too large"),
            ));
        }
        Ok(shape)
    }

    fn infer_shape(
        &self,
        inputs: &[Shape],
        module_outputs: &[Vec<Shape>],
    ) -> Result<Shape, IrError> {
        let check = CheckShapes::new(self.name(), inputs);
        match self {
            Self::Literal(lit) => {
                check.has(0)?;
                Ok(lit.shape().clone())
            }
            Self::Parameter { shape, .. } | Self::Allocate { shape } => {
                check.has(0)?;
                Ok(shape.clone())
            }
            Self::Return => match inputs {
                [single] => Ok(single.clone()),
                _ => Ok(Shape::tuple(inputs.to_vec())),
            },
            Self::Undefined => {
                check.has(0)?;
                Ok(Shape::new(ElementType::Float, Vec::new()))
            }
            Self::Identity => {
                check.has(1)?;
                Ok(inputs[0].clone())
            }
            Self::Contiguous => {
                check.has(1)?.not_tuple()?;
                Ok(inputs[0].as_standard())
            }
            Self::Convert { target_type } => {
                check.has(1)?.not_tuple()?;
                Ok(pointwise_output(&inputs[..1]).with_type(*target_type))
            }
            Self::Neg
            | Self::Exp
            | Self::Sqrt
            | Self::Erf
            | Self::Tanh
            | Self::Sigmoid
            | Self::Relu
            | Self::Nearbyint
            | Self::Recip => {
                check.has(1)?.not_tuple()?;
                Ok(pointwise_output(inputs))
            }
            Self::Add | Self::Sub | Self::Mul | Self::Div | Self::Pow | Self::Max | Self::Min => {
                check.has(2)?.same_type()?.same_dims()?;
                Ok(pointwise_output(inputs))
            }
            Self::Clip => {
                check.has(3)?.same_type()?.same_dims()?;
                Ok(pointwise_output(inputs))
            }
            Self::Transpose { permutation } => {
                check.has(1)?.not_tuple()?;
                transpose_shape(self.name(), &inputs[0], permutation)
            }
            Self::Reshape { dims } => {
                check.has(1)?.only_static()?;
                reshape_shape(self.name(), &inputs[0], dims)
            }
            Self::Broadcast { axis, out_lens } => {
                check.has(1)?.only_static()?;
                broadcast_shape(self.name(), &inputs[0], *axis, out_lens)
            }
            Self::Multibroadcast { out_lens } => {
                check.has(1)?.only_static()?;
                multibroadcast_shape(self.name(), &inputs[0], out_lens)
            }
            Self::Pad { pads, .. } => {
                check.has(1)?.only_static()?;
                let input = &inputs[0];
                let ndim = input.ndim();
                if pads.len() != 2 * ndim {
                    return Err(IrError::shape(
                        self.name(),
                        format!("expected {} pads for rank {ndim}, found {}", 2 * ndim, pads.len()),
                    ));
                }
                let lens = (0..ndim)
                    .map(|i| {
                        input.lens()[i]
                            .checked_add(pads[i])
                            .and_then(|l| l.checked_add(pads[i + ndim]))
                    })
                    .collect::<Option<Vec<usize>>>()
                    .ok_or_else(|| IrError::shape(self.name(), format!("pads {pads:?} overflow")))?;
                Ok(input.with_lens(lens))
            }
            Self::Convolution {
                padding,
                stride,
                dilation,
                group,
            } => {
                check.has(2)?.only_static()?.same_type()?.same_ndim()?.min_ndim(3)?;
                convolution_shape(self.name(), inputs, padding, stride, dilation, *group)
            }
            Self::Dot => {
                check.has(2)?.only_static()?.same_type()?.same_ndim()?.min_ndim(2)?;
                let (a, b) = (inputs[0].lens(), inputs[1].lens());
                let n = a.len();
                if a[..n - 2] != b[..n - 2] {
                    return Err(IrError::shape(
                        self.name(),
                        format!("batch dimensions differ: {inputs:?}"),
                    ));
                }
                if a[n - 1] != b[n - 2] {
                    return Err(IrError::shape(
                        self.name(),
                        format!("inner dimensions differ: {} vs {}", a[n - 1], b[n - 2]),
                    ));
                }
                let mut lens = a.to_vec();
                lens[n - 1] = b[n - 1];
                Ok(inputs[0].with_lens(lens))
            }
            Self::ReduceMean { axes } => {
                check.has(1)?.only_static()?;
                let input = &inputs[0];
                let mut lens = input.lens().to_vec();
                for &axis in axes {
                    if axis >= lens.len() {
                        return Err(IrError::shape(
                            self.name(),
                            format!("axis {axis} out of range for rank {}", lens.len()),
                        ));
                    }
                    lens[axis] = 1;
                }
                Ok(input.with_lens(lens))
            }
            Self::Layernorm { .. } => {
                check.has(1)?.not_tuple()?.min_ndim(1)?;
                Ok(inputs[0].as_standard())
            }
            Self::QuantizeLinear => {
                check.has_between(2, 3)?.only_static()?.same_lens()?;
                let out_type = inputs.get(2).map_or(ElementType::Uint8, Shape::ty);
                if inputs[0].ty() != inputs[1].ty() && inputs[0].ty() != ElementType::Int32 {
                    return Err(IrError::shape(
                        self.name(),
                        format!("scale type {} differs from input type {}", inputs[1].ty(), inputs[0].ty()),
                    ));
                }
                Ok(Shape::new(out_type, inputs[0].lens().to_vec()))
            }
            Self::DequantizeLinear => {
                check.has_between(2, 3)?.only_static()?.same_lens()?;
                if let Some(zp) = inputs.get(2)
                    && zp.ty() != inputs[0].ty()
                {
                    return Err(IrError::shape(
                        self.name(),
                        format!("zero point type {} differs from input type {}", zp.ty(), inputs[0].ty()),
                    ));
                }
                Ok(Shape::new(inputs[1].ty(), inputs[0].lens().to_vec()))
            }
            Self::If => {
                check.has(1)?;
                if inputs[0].ty() != ElementType::Bool || inputs[0].elements() != 1 {
                    return Err(IrError::shape(
                        self.name(),
                        format!("condition must be a single bool, found {}", inputs[0]),
                    ));
                }
                match module_outputs {
                    [then_out, else_out] if then_out == else_out => {
                        Ok(Shape::tuple(then_out.clone()))
                    }
                    [_, _] => Err(IrError::shape(
                        self.name(),
                        "then and else branches produce different shapes",
                    )),
                    _ => Err(IrError::shape(
                        self.name(),
                        format!("expected 2 sub-modules, found {}", module_outputs.len()),
                    )),
                }
            }
            Self::Loop { max_iterations } => {
                check.has_at_least(2)?;
                let [body] = module_outputs else {
                    return Err(IrError::shape(
                        self.name(),
                        format!("expected 1 sub-module, found {}", module_outputs.len()),
                    ));
                };
                let carried = &inputs[2..];
                if body.len() < 1 + carried.len() {
                    return Err(IrError::shape(
                        self.name(),
                        format!(
                            "body returns {} values but {} are required",
                            body.len(),
                            1 + carried.len()
                        ),
                    ));
                }
                if body[1..=carried.len()] != *carried {
                    return Err(IrError::shape(
                        self.name(),
                        "loop-carried shapes differ between inputs and body outputs",
                    ));
                }
                let mut outs = carried.to_vec();
                for scan in &body[1 + carried.len()..] {
                    let mut lens = vec![*max_iterations];
                    lens.extend_from_slice(scan.lens());
                    outs.push(scan.with_lens(lens));
                }
                Ok(Shape::tuple(outs))
            }
            Self::GetTupleElem { index } => {
                check.has(1)?;
                let subs = inputs[0].sub_shapes();
                subs.get(*index).cloned().ok_or_else(|| {
                    IrError::shape(
                        self.name(),
                        format!("index {index} out of range for tuple of {}", subs.len()),
                    )
                })
            }
        }
    }

    /// Evaluates the operator on constant inputs.
    ///
    /// Returns `None` for operators that cannot be evaluated at compile time.
    /// `output` must be the shape produced by [`Operator::compute_shape`].
    pub fn compute(&self, output: &Shape, inputs: &[&Literal]) -> Option<Literal> {
        let out = output.as_standard();
        match self {
            Self::Literal(lit) => Some(lit.clone()),
            Self::Identity | Self::Contiguous | Self::Reshape { .. } | Self::Convert { .. } => {
                Some(Literal::new(out, inputs[0].data().to_vec()))
            }
            op if op.is_unary_pointwise() => {
                let f = unary_fn(op)?;
                let data: Vec<f64> = inputs[0].data().iter().map(|&v| f(v)).collect();
                Some(Literal::new(out, data))
            }
            op if op.is_binary_pointwise() => {
                let f = binary_fn(op)?;
                let data: Vec<f64> = inputs[0]
                    .data()
                    .iter()
                    .zip(inputs[1].data())
                    .map(|(&a, &b)| f(a, b))
                    .collect();
                Some(Literal::new(out, data))
            }
            Self::Clip => {
                let data: Vec<f64> = inputs[0]
                    .data()
                    .iter()
                    .zip(inputs[1].data())
                    .zip(inputs[2].data())
                    .map(|((&x, &lo), &hi)| x.max(lo).min(hi))
                    .collect();
                Some(Literal::new(out, data))
            }
            Self::Transpose { permutation } => {
                let input = inputs[0];
                let in_strides = standard_strides(input.shape().lens());
                let data = gather(&out, |idx| {
                    permutation
                        .iter()
                        .enumerate()
                        .map(|(i, &p)| idx[i] * in_strides[p])
                        .sum::<usize>()
                }, input.data());
                Some(Literal::new(out, data))
            }
            Self::Broadcast { axis, .. } => {
                let input = inputs[0];
                let in_lens = input.shape().lens();
                let in_strides = standard_strides(in_lens);
                let data = gather(&out, |idx| {
                    (0..in_lens.len())
                        .map(|i| idx[axis + i] * in_strides[i])
                        .sum::<usize>()
                }, input.data());
                Some(Literal::new(out, data))
            }
            Self::Multibroadcast { out_lens } => {
                let input = inputs[0];
                let in_lens = input.shape().lens();
                let in_strides = standard_strides(in_lens);
                let offset = out_lens.len() - in_lens.len();
                let data = gather(&out, |idx| {
                    (0..in_lens.len())
                        .filter(|&i| in_lens[i] != 1)
                        .map(|i| idx[offset + i] * in_strides[i])
                        .sum::<usize>()
                }, input.data());
                Some(Literal::new(out, data))
            }
            Self::Pad { pads, mode, value } => {
                let input = inputs[0];
                let in_lens = input.shape().lens();
                let in_strides = standard_strides(in_lens);
                let ndim = in_lens.len();
                let data = (0..out.elements())
                    .map(|i| {
                        let idx = out.multi_index(i);
                        let mut offset = 0;
                        for axis in 0..ndim {
                            let pos = idx[axis] as i64 - pads[axis] as i64;
                            let len = in_lens[axis] as i64;
                            let pos = match mode {
                                PadMode::Constant if pos < 0 || pos >= len => return *value,
                                PadMode::Constant => pos,
                                PadMode::Edge => pos.clamp(0, len - 1),
                                PadMode::Reflect => reflect(pos, len),
                            };
                            offset += pos as usize * in_strides[axis];
                        }
                        input.data()[offset]
                    })
                    .collect::<Vec<_>>();
                Some(Literal::new(out, data))
            }
            Self::ReduceMean { axes } => {
                let input = inputs[0];
                let in_shape = input.shape();
                let out_strides = standard_strides(out.lens());
                let mut sums = vec![0.0; out.elements()];
                for (i, &v) in input.data().iter().enumerate() {
                    let mut idx = in_shape.multi_index(i);
                    for &a in axes {
                        idx[a] = 0;
                    }
                    let o: usize = idx.iter().zip(&out_strides).map(|(&x, &s)| x * s).sum();
                    sums[o] += v;
                }
                let count = (in_shape.elements() / out.elements().max(1)).max(1) as f64;
                Some(Literal::new(out, sums.into_iter().map(|s| s / count).collect::<Vec<_>>()))
            }
            _ => None,
        }
    }

    /// Attribute name/value pairs as shown by the printer.
    fn attribute_list(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::Parameter { name, .. } => vec![("name", name.clone())],
            Self::Allocate { shape } => vec![("shape", format!("{{{shape}}}"))],
            Self::Convert { target_type } => vec![("target_type", target_type.to_string())],
            Self::Transpose { permutation } => vec![("permutation", list(permutation))],
            Self::Reshape { dims } => vec![("dims", list(dims))],
            Self::Broadcast { axis, out_lens } => {
                vec![("axis", axis.to_string()), ("out_lens", list(out_lens))]
            }
            Self::Multibroadcast { out_lens } => vec![("out_lens", list(out_lens))],
            Self::Pad { pads, mode, value } => vec![
                ("pads", list(pads)),
                ("mode", format!("{mode:?}").to_lowercase()),
                ("value", value.to_string()),
            ],
            Self::Convolution {
                padding,
                stride,
                dilation,
                group,
            } => vec![
                ("padding", list(padding)),
                ("stride", list(stride)),
                ("dilation", list(dilation)),
                ("group", group.to_string()),
            ],
            Self::ReduceMean { axes } => vec![("axes", list(axes))],
            Self::Layernorm { epsilon } => vec![("epsilon", epsilon.to_string())],
            Self::Loop { max_iterations } => vec![("max_iterations", max_iterations.to_string())],
            Self::GetTupleElem { index } => vec![("index", index.to_string())],
            _ => Vec::new(),
        }
    }
}

/// Hashes floats so that values comparing equal hash equally (`0.0 == -0.0`).
fn hash_f64<H: Hasher>(v: f64, state: &mut H) {
    let bits = if v == 0.0 { 0 } else { v.to_bits() };
    bits.hash(state);
}

impl Hash for Operator {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name().hash(state);
        match self {
            Self::Literal(lit) => {
                lit.shape().hash(state);
                for &v in lit.data() {
                    hash_f64(v, state);
                }
            }
            Self::Parameter { name, shape } => {
                name.hash(state);
                shape.hash(state);
            }
            Self::Allocate { shape } => shape.hash(state),
            Self::Convert { target_type } => target_type.hash(state),
            Self::Transpose { permutation } => permutation.hash(state),
            Self::Reshape { dims } => dims.hash(state),
            Self::Broadcast { axis, out_lens } => {
                axis.hash(state);
                out_lens.hash(state);
            }
            Self::Multibroadcast { out_lens } => out_lens.hash(state),
            Self::Pad { pads, mode, value } => {
                pads.hash(state);
                mode.hash(state);
                hash_f64(*value, state);
            }
            Self::Convolution {
                padding,
                stride,
                dilation,
                group,
            } => {
                padding.hash(state);
                stride.hash(state);
                dilation.hash(state);
                group.hash(state);
            }
            Self::ReduceMean { axes } => axes.hash(state),
            Self::Layernorm { epsilon } => hash_f64(*epsilon, state),
            Self::Loop { max_iterations } => max_iterations.hash(state),
            Self::GetTupleElem { index } => index.hash(state),
            _ => {}
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())?;
        let attrs = self.attribute_list();
        if !attrs.is_empty() {
            let parts: Vec<String> = attrs.iter().map(|(k, v)| format!("{k}={v}")).collect();
            write!(f, "[{}]", parts.join(","))?;
        }
        Ok(())
    }
}

fn list<T: fmt::Display>(values: &[T]) -> String {
    let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    format!("{{{}}}", parts.join(","))
}

fn reflect(pos: i64, len: i64) -> i64 {
    if len == 1 {
        return 0;
    }
    let period = 2 * (len - 1);
    let p = pos.rem_euclid(period);
    if p < len { p } else { period - p }
}

/// Builds row-major output data by mapping each output index to an input offset.
fn gather(out: &Shape, map: impl Fn(&[usize]) -> usize, data: &[f64]) -> Vec<f64> {
    (0..out.elements())
        .map(|i| data[map(&out.multi_index(i))])
        .collect()
}

fn unary_fn(op: &Operator) -> Option<fn(f64) -> f64> {
    let f: fn(f64) -> f64 = match op {
        Operator::Neg => |x: f64| -x,
        Operator::Exp => f64::exp,
        Operator::Sqrt => f64::sqrt,
        Operator::Erf => erf,
        Operator::Tanh => f64::tanh,
        Operator::Sigmoid => |x: f64| 1.0 / (1.0 + (-x).exp()),
        Operator::Relu => |x: f64| x.max(0.0),
        Operator::Nearbyint => f64::round_ties_even,
        Operator::Recip => |x: f64| 1.0 / x,
        _ => return None,
    };
    Some(f)
}

fn binary_fn(op: &Operator) -> Option<fn(f64, f64) -> f64> {
    let f: fn(f64, f64) -> f64 = match op {
        Operator::Add => |a: f64, b: f64| a + b,
        Operator::Sub => |a: f64, b: f64| a - b,
        Operator::Mul => |a: f64, b: f64| a * b,
        Operator::Div => |a: f64, b: f64| a / b,
        Operator::Pow => f64::powf,
        Operator::Max => f64::max,
        Operator::Min => f64::min,
        _ => return None,
    };
    Some(f)
}

/// Abramowitz-Stegun 7.1.26 approximation (|error| < 1.5e-7).
fn erf(x: f64) -> f64 {
    let t = 1.0 / (1.0 + 0.327_591_1 * x.abs());
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    let y = 1.0 - poly * (-x * x).exp();
    if x >= 0.0 { y } else { -y }
}

/// Output shape of a pointwise operator: the shared layout if every input is
/// packed with identical strides, otherwise standard.
fn pointwise_output(inputs: &[Shape]) -> Shape {
    let first = &inputs[0];
    if first.dynamic_shape() {
        return first.clone();
    }
    let same_layout = inputs
        .iter()
        .all(|s| s.packed() && s.strides() == first.strides());
    if same_layout {
        first.clone()
    } else {
        first.as_standard()
    }
}

fn transpose_shape(op: &str, input: &Shape, perm: &[usize]) -> Result<Shape, IrError> {
    let ndim = input.ndim();
    let mut seen = vec![false; ndim];
    let valid = perm.len() == ndim
        && perm
            .iter()
            .all(|&p| p < ndim && !std::mem::replace(&mut seen[p], true));
    if !valid {
        return Err(IrError::shape(
            op,
            format!("{perm:?} is not a permutation of rank {ndim}"),
        ));
    }
    if input.dynamic_shape() {
        let dims: Vec<_> = perm.iter().map(|&p| input.dyn_dims()[p].clone()).collect();
        return Ok(Shape::dynamic(input.ty(), dims));
    }
    let lens: Vec<usize> = perm.iter().map(|&p| input.lens()[p]).collect();
    let strides: Vec<usize> = perm.iter().map(|&p| input.strides()[p]).collect();
    Ok(Shape::with_strides(input.ty(), lens, strides))
}

fn reshape_shape(op: &str, input: &Shape, dims: &[i64]) -> Result<Shape, IrError> {
    if dims.iter().filter(|&&d| d == -1).count() > 1 {
        return Err(IrError::shape(op, "at most one dimension may be -1"));
    }
    let mut lens = Vec::with_capacity(dims.len());
    for (i, &d) in dims.iter().enumerate() {
        let len = match d {
            0 => *input.lens().get(i).ok_or_else(|| {
                IrError::shape(op, format!("dimension {i} copies a missing input axis"))
            })?,
            -1 => 1,
            d if d > 0 => d as usize,
            d => return Err(IrError::shape(op, format!("invalid dimension {d}"))),
        };
        lens.push(len);
    }
    let known = lens
        .iter()
        .try_fold(1usize, |acc, &l| acc.checked_mul(l))
        .ok_or_else(|| IrError::shape(op, format!("{dims:?} overflows")))?;
    if let Some(pos) = dims.iter().position(|&d| d == -1) {
        if known == 0 || input.elements() % known != 0 {
            return Err(IrError::shape(
                op,
                format!("cannot infer -1 for {} elements into {dims:?}", input.elements()),
            ));
        }
        lens[pos] = input.elements() / known;
    }
    let out = input.with_lens(lens);
    if out.elements() != input.elements() {
        return Err(IrError::shape(
            op,
            format!(
                "cannot reshape {} elements into {:?}",
                input.elements(),
                out.lens()
            ),
        ));
    }
    Ok(out)
}

fn broadcast_shape(
    op: &str,
    input: &Shape,
    axis: usize,
    out_lens: &[usize],
) -> Result<Shape, IrError> {
    let n = input.ndim();
    let fits = axis
        .checked_add(n)
        .is_some_and(|end| end <= out_lens.len() && input.lens() == &out_lens[axis..end]);
    if !fits {
        return Err(IrError::shape(
            op,
            format!(
                "input {:?} does not fit {:?} at axis {axis}",
                input.lens(),
                out_lens
            ),
        ));
    }
    let mut strides = vec![0; out_lens.len()];
    strides[axis..axis + n].copy_from_slice(input.strides());
    Ok(Shape::with_strides(input.ty(), out_lens.to_vec(), strides))
}

fn multibroadcast_shape(op: &str, input: &Shape, out_lens: &[usize]) -> Result<Shape, IrError> {
    let n = input.ndim();
    if n > out_lens.len() {
        return Err(IrError::shape(
            op,
            format!("cannot broadcast rank {n} to rank {}", out_lens.len()),
        ));
    }
    let offset = out_lens.len() - n;
    let mut strides = vec![0; out_lens.len()];
    for i in 0..n {
        let (len, out) = (input.lens()[i], out_lens[offset + i]);
        if len == out {
            strides[offset + i] = input.strides()[i];
        } else if len != 1 {
            return Err(IrError::shape(
                op,
                format!("{:?} is not broadcastable to {out_lens:?}", input.lens()),
            ));
        }
    }
    Ok(Shape::with_strides(input.ty(), out_lens.to_vec(), strides))
}

fn convolution_shape(
    op: &str,
    inputs: &[Shape],
    padding: &[usize],
    stride: &[usize],
    dilation: &[usize],
    group: usize,
) -> Result<Shape, IrError> {
    let (x, w) = (inputs[0].lens(), inputs[1].lens());
    let k = x.len() - 2;
    if padding.len() != 2 * k && padding.len() != k {
        return Err(IrError::shape(
            op,
            format!("expected {} or {} padding values, found {}", k, 2 * k, padding.len()),
        ));
    }
    if stride.len() != k || dilation.len() != k {
        return Err(IrError::shape(
            op,
            format!("stride and dilation must have {k} values"),
        ));
    }
    if group == 0 || w[1].checked_mul(group) != Some(x[1]) {
        return Err(IrError::shape(
            op,
            format!("input channels {} do not match weights {} x group {group}", x[1], w[1]),
        ));
    }
    let mut lens = vec![x[0], w[0]];
    for i in 0..k {
        let (begin, end) = if padding.len() == k {
            (padding[i], padding[i])
        } else {
            (padding[i], padding[i + k])
        };
        let overflow = || IrError::shape(op, "padding or dilation overflows");
        let padded = x[i + 2]
            .checked_add(begin)
            .and_then(|l| l.checked_add(end))
            .ok_or_else(overflow)?;
        let window = dilation[i]
            .checked_mul(w[i + 2].saturating_sub(1))
            .and_then(|l| l.checked_add(1))
            .ok_or_else(overflow)?;
        if stride[i] == 0 || padded < window {
            return Err(IrError::shape(
                op,
                format!("kernel {:?} does not fit padded input {:?}", &w[2..], &x[2..]),
            ));
        }
        lens.push((padded - window) / stride[i] + 1);
    }
    Ok(inputs[0].with_lens(lens))
}

/// Fluent validation of operator inputs, producing [`IrError::Shape`].
struct CheckShapes<'a> {
    op: &'static str,
    shapes: &'a [Shape],
}

impl<'a> CheckShapes<'a> {
    fn new(op: &'static str, shapes: &'a [Shape]) -> Self {
        Self { op, shapes }
    }

    fn fail<T>(&self, message: String) -> Result<T, IrError> {
        Err(IrError::shape(self.op, message))
    }

    fn has(self, n: usize) -> Result<Self, IrError> {
        if self.shapes.len() != n {
            return self.fail(format!("expected {n} inputs, found {}", self.shapes.len()));
        }
        Ok(self)
    }

    fn has_between(self, lo: usize, hi: usize) -> Result<Self, IrError> {
        if !(lo..=hi).contains(&self.shapes.len()) {
            return self.fail(format!(
                "expected {lo} to {hi} inputs, found {}",
                self.shapes.len()
            ));
        }
        Ok(self)
    }

    fn has_at_least(self, n: usize) -> Result<Self, IrError> {
        if self.shapes.len() < n {
            return self.fail(format!(
                "expected at least {n} inputs, found {}",
                self.shapes.len()
            ));
        }
        Ok(self)
    }

    fn not_tuple(self) -> Result<Self, IrError> {
        if let Some(s) = self.shapes.iter().find(|s| s.is_tuple()) {
            return self.fail(format!("tuple input {s} is not supported"));
        }
        Ok(self)
    }

    fn only_static(self) -> Result<Self, IrError> {
        let checked = self.not_tuple()?;
        if let Some(s) = checked.shapes.iter().find(|s| s.dynamic_shape()) {
            return checked.fail(format!("dynamic input {s} is not supported"));
        }
        Ok(checked)
    }

    fn same_type(self) -> Result<Self, IrError> {
        if let Some(first) = self.shapes.first()
            && let Some(s) = self.shapes.iter().find(|s| s.ty() != first.ty())
        {
            return self.fail(format!("mismatched types {} and {}", first.ty(), s.ty()));
        }
        Ok(self)
    }

    fn same_ndim(self) -> Result<Self, IrError> {
        if let Some(first) = self.shapes.first()
            && let Some(s) = self.shapes.iter().find(|s| s.ndim() != first.ndim())
        {
            return self.fail(format!("mismatched ranks: {{{first}}} and {{{s}}}"));
        }
        Ok(self)
    }

    fn min_ndim(self, n: usize) -> Result<Self, IrError> {
        if let Some(s) = self.shapes.iter().find(|s| s.ndim() < n) {
            return self.fail(format!("expected rank >= {n}, found {{{s}}}"));
        }
        Ok(self)
    }

    /// Lengths (or dynamic ranges) agree across inputs.
    fn same_dims(self) -> Result<Self, IrError> {
        let checked = self.not_tuple()?;
        if let Some(first) = checked.shapes.first() {
            let dims_of = |s: &Shape| s.to_dynamic().dyn_dims().to_vec();
            let expected = dims_of(first);
            if let Some(s) = checked.shapes.iter().find(|s| dims_of(s) != expected) {
                return checked.fail(format!("mismatched dimensions: {{{first}}} and {{{s}}}"));
            }
        }
        Ok(checked)
    }

    fn same_lens(self) -> Result<Self, IrError> {
        if let Some(first) = self.shapes.first()
            && let Some(s) = self.shapes.iter().find(|s| s.lens() != first.lens())
        {
            return self.fail(format!("mismatched lengths: {{{first}}} and {{{s}}}"));
        }
        Ok(self)
    }
}
