//! Tensor shape and element type model.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::IrError;

/// Element type of a tensor.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    Bool,
    Half,
    Bf16,
    Float,
    Double,
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Fp8e4m3fnuz,
    Fp8e4m3fn,
    Fp8e5m2,
    /// Aggregate of sub-shapes; see [`Shape::sub_shapes`].
    Tuple,
}

impl ElementType {
    /// Canonical type name as printed in IR dumps.
    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool_type",
            Self::Half => "half_type",
            Self::Bf16 => "bf16_type",
            Self::Float => "float_type",
            Self::Double => "double_type",
            Self::Int8 => "int8_type",
            Self::Uint8 => "uint8_type",
            Self::Int16 => "int16_type",
            Self::Uint16 => "uint16_type",
            Self::Int32 => "int32_type",
            Self::Uint32 => "uint32_type",
            Self::Int64 => "int64_type",
            Self::Uint64 => "uint64_type",
            Self::Fp8e4m3fnuz => "fp8e4m3fnuz_type",
            Self::Fp8e4m3fn => "fp8e4m3fn_type",
            Self::Fp8e5m2 => "fp8e5m2_type",
            Self::Tuple => "tuple_type",
        }
    }

    /// Size of one element in bytes (0 for tuples).
    pub fn size(self) -> usize {
        match self {
            Self::Bool | Self::Int8 | Self::Uint8 => 1,
            Self::Fp8e4m3fnuz | Self::Fp8e4m3fn | Self::Fp8e5m2 => 1,
            Self::Half | Self::Bf16 | Self::Int16 | Self::Uint16 => 2,
            Self::Float | Self::Int32 | Self::Uint32 => 4,
            Self::Double | Self::Int64 | Self::Uint64 => 8,
            Self::Tuple => 0,
        }
    }

    pub fn is_integral(self) -> bool {
        matches!(
            self,
            Self::Bool
                | Self::Int8
                | Self::Uint8
                | Self::Int16
                | Self::Uint16
                | Self::Int32
                | Self::Uint32
                | Self::Int64
                | Self::Uint64
        )
    }

    pub fn is_signed(self) -> bool {
        !matches!(
            self,
            Self::Bool | Self::Uint8 | Self::Uint16 | Self::Uint32 | Self::Uint64 | Self::Tuple
        )
    }

    pub fn is_floating(self) -> bool {
        !self.is_integral() && self != Self::Tuple
    }

    /// Smallest finite value representable by this type.
    pub fn min_value(self) -> f64 {
        match self {
            Self::Bool => 0.0,
            Self::Int8 => i8::MIN as f64,
            Self::Uint8 | Self::Uint16 | Self::Uint32 | Self::Uint64 => 0.0,
            Self::Int16 => i16::MIN as f64,
            Self::Int32 => i32::MIN as f64,
            Self::Int64 => i64::MIN as f64,
            _ => -self.max_value(),
        }
    }

    /// Largest finite value representable by this type.
    pub fn max_value(self) -> f64 {
        match self {
            Self::Bool => 1.0,
            Self::Int8 => i8::MAX as f64,
            Self::Uint8 => u8::MAX as f64,
            Self::Int16 => i16::MAX as f64,
            Self::Uint16 => u16::MAX as f64,
            Self::Int32 => i32::MAX as f64,
            Self::Uint32 => u32::MAX as f64,
            Self::Int64 => i64::MAX as f64,
            Self::Uint64 => u64::MAX as f64,
            Self::Half => 65504.0,
            Self::Bf16 => 3.389_531_389_251_535_5e38,
            Self::Float => f32::MAX as f64,
            Self::Double => f64::MAX,
            Self::Fp8e4m3fnuz => 240.0,
            Self::Fp8e4m3fn => 448.0,
            Self::Fp8e5m2 => 57344.0,
            Self::Tuple => 0.0,
        }
    }

    /// Converts `value` into this type's value domain.
    ///
    /// Integers truncate toward zero and saturate; `bool` maps non-zero to
    /// one; floating types round through `f32` unless they are `double`.
    pub fn cast(self, value: f64) -> f64 {
        match self {
            Self::Bool => {
                if value != 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Double => value,
            Self::Tuple => value,
            t if t.is_integral() => {
                if value.is_nan() {
                    0.0
                } else {
                    value.trunc().clamp(t.min_value(), t.max_value())
                }
            }
            _ => value as f32 as f64,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A dynamic dimension: an inclusive `[min, max]` range plus optimization hints.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct DynamicDimension {
    pub min: usize,
    pub max: usize,
    #[serde(default)]
    pub optimals: Vec<usize>,
}

impl DynamicDimension {
    pub fn new(min: usize, max: usize) -> Self {
        Self {
            min,
            max,
            optimals: Vec::new(),
        }
    }

    /// A fixed dimension, `min == max`.
    pub fn fixed(len: usize) -> Self {
        Self::new(len, len)
    }

    pub fn is_fixed(&self) -> bool {
        self.min == self.max
    }
}

impl fmt::Display for DynamicDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}", self.min, self.max)?;
        if !self.optimals.is_empty() {
            write!(f, ", {{{}}}", join(&self.optimals))?;
        }
        f.write_str("]")
    }
}

/// Shape of a tensor value: element type, lengths and strides.
///
/// Static shapes carry `lens` and `strides` (in elements). Dynamic shapes
/// carry one [`DynamicDimension`] per axis instead. Tuple shapes carry
/// sub-shapes and no dimensions.
///
/// Deserialized shapes are checked for consistent dimensions and an
/// addressable size before they reach the graph.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ShapeRecord")]
pub struct Shape {
    ty: ElementType,
    #[serde(default)]
    lens: Vec<usize>,
    #[serde(default)]
    strides: Vec<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    dyn_dims: Vec<DynamicDimension>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    sub_shapes: Vec<Shape>,
}

/// Row-major strides for `lens`.
pub fn standard_strides(lens: &[usize]) -> Vec<usize> {
    let mut strides: Vec<usize> = vec![1; lens.len()];
    for i in (0..lens.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1].saturating_mul(lens[i + 1].max(1));
    }
    strides
}

impl Shape {
    /// A standard (row-major, packed) shape.
    pub fn new(ty: ElementType, lens: impl Into<Vec<usize>>) -> Self {
        let lens = lens.into();
        let strides = standard_strides(&lens);
        Self {
            ty,
            lens,
            strides,
            dyn_dims: Vec::new(),
            sub_shapes: Vec::new(),
        }
    }

    /// A shape with explicit strides.
    ///
    /// # Panics
    ///
    /// Panics if `lens` and `strides` differ in length.
    pub fn with_strides(
        ty: ElementType,
        lens: impl Into<Vec<usize>>,
        strides: impl Into<Vec<usize>>,
    ) -> Self {
        let lens = lens.into();
        let strides = strides.into();
        assert_eq!(
            lens.len(),
            strides.len(),
            "Shape::with_strides: {} lens but {} strides",
            lens.len(),
            strides.len()
        );
        Self {
            ty,
            lens,
            strides,
            dyn_dims: Vec::new(),
            sub_shapes: Vec::new(),
        }
    }

    /// A single-element shape.
    pub fn scalar(ty: ElementType) -> Self {
        Self::new(ty, vec![1])
    }

    /// A shape whose dimensions are only known as ranges.
    pub fn dynamic(ty: ElementType, dims: impl Into<Vec<DynamicDimension>>) -> Self {
        Self {
            ty,
            lens: Vec::new(),
            strides: Vec::new(),
            dyn_dims: dims.into(),
            sub_shapes: Vec::new(),
        }
    }

    /// A tuple of shapes.
    pub fn tuple(sub_shapes: impl Into<Vec<Shape>>) -> Self {
        Self {
            ty: ElementType::Tuple,
            lens: Vec::new(),
            strides: Vec::new(),
            dyn_dims: Vec::new(),
            sub_shapes: sub_shapes.into(),
        }
    }

    pub fn ty(&self) -> ElementType {
        self.ty
    }

    pub fn lens(&self) -> &[usize] {
        &self.lens
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn dyn_dims(&self) -> &[DynamicDimension] {
        &self.dyn_dims
    }

    pub fn sub_shapes(&self) -> &[Shape] {
        &self.sub_shapes
    }

    pub fn is_tuple(&self) -> bool {
        self.ty == ElementType::Tuple
    }

    pub fn dynamic_shape(&self) -> bool {
        !self.dyn_dims.is_empty()
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        if self.dynamic_shape() {
            self.dyn_dims.len()
        } else {
            self.lens.len()
        }
    }

    /// Number of logical elements (0 for tuples, dynamic and rank-0 shapes).
    pub fn elements(&self) -> usize {
        if self.is_tuple() || self.dynamic_shape() || self.lens.is_empty() {
            return 0;
        }
        self.lens.iter().product()
    }

    /// Number of elements the strides span in memory.
    pub fn element_space(&self) -> usize {
        if self.elements() == 0 {
            return 0;
        }
        self.lens
            .iter()
            .zip(&self.strides)
            .map(|(&l, &s)| (l - 1) * s)
            .sum::<usize>()
            + 1
    }

    /// Bytes needed to hold the tensor.
    pub fn bytes(&self) -> usize {
        if self.is_tuple() {
            return self.sub_shapes.iter().map(Shape::bytes).sum();
        }
        self.element_space() * self.ty.size()
    }

    /// `true` if any axis has a zero stride.
    pub fn broadcasted(&self) -> bool {
        !self.dynamic_shape() && self.strides.contains(&0)
    }

    /// `true` if the strides of non-unit axes are not in decreasing order.
    pub fn transposed(&self) -> bool {
        let strides: Vec<usize> = self
            .lens
            .iter()
            .zip(&self.strides)
            .filter(|&(&l, &s)| l != 1 && s != 0)
            .map(|(_, &s)| s)
            .collect();
        strides.windows(2).any(|w| w[0] < w[1])
    }

    /// `true` if the elements occupy memory without gaps.
    pub fn packed(&self) -> bool {
        !self.dynamic_shape()
            && !self.is_tuple()
            && !self.broadcasted()
            && self.elements() == self.element_space()
    }

    /// `true` if the layout is row-major and packed.
    pub fn standard(&self) -> bool {
        self.packed() && !self.transposed()
    }

    /// Same type with new lengths and standard strides.
    pub fn with_lens(&self, lens: impl Into<Vec<usize>>) -> Self {
        Self::new(self.ty, lens)
    }

    /// Same dimensions with a different element type.
    pub fn with_type(&self, ty: ElementType) -> Self {
        let mut s = self.clone();
        s.ty = ty;
        s
    }

    /// Same type and lengths with standard strides.
    pub fn as_standard(&self) -> Self {
        if self.dynamic_shape() || self.is_tuple() {
            return self.clone();
        }
        Self::new(self.ty, self.lens.clone())
    }

    /// Dynamic dimensions for this shape; fixed ranges for static shapes.
    pub fn to_dynamic(&self) -> Self {
        if self.dynamic_shape() || self.is_tuple() {
            return self.clone();
        }
        Self::dynamic(
            self.ty,
            self.lens
                .iter()
                .map(|&l| DynamicDimension::fixed(l))
                .collect::<Vec<_>>(),
        )
    }

    /// Maximum lengths (the actual lengths for static shapes).
    pub fn max_lens(&self) -> Vec<usize> {
        if self.dynamic_shape() {
            self.dyn_dims.iter().map(|d| d.max).collect()
        } else {
            self.lens.clone()
        }
    }

    /// Row-major multi-index of the `i`-th logical element.
    pub fn multi_index(&self, mut i: usize) -> Vec<usize> {
        let mut idx = vec![0; self.lens.len()];
        for axis in (0..self.lens.len()).rev() {
            let len = self.lens[axis].max(1);
            idx[axis] = i % len;
            i /= len;
        }
        idx
    }

    /// `true` if the element count, memory span and byte size all fit in
    /// `usize`.
    pub fn addressable(&self) -> bool {
        if self.is_tuple() {
            return self.sub_shapes.iter().all(Shape::addressable);
        }
        let count = self
            .lens
            .iter()
            .try_fold(1usize, |acc, &l| acc.checked_mul(l.max(1)));
        let span = self
            .lens
            .iter()
            .zip(&self.strides)
            .try_fold(1usize, |acc, (&l, &s)| {
                l.saturating_sub(1).checked_mul(s)?.checked_add(acc)
            });
        count.is_some()
            && span
                .and_then(|span| span.checked_mul(self.ty.size()))
                .is_some()
    }

    /// Memory offset (in elements) of a multi-index.
    pub fn offset(&self, idx: &[usize]) -> usize {
        idx.iter().zip(&self.strides).map(|(&i, &s)| i * s).sum()
    }
}

/// Wire form of [`Shape`], validated on the way in.
#[derive(Deserialize)]
struct ShapeRecord {
    ty: ElementType,
    #[serde(default)]
    lens: Vec<usize>,
    #[serde(default)]
    strides: Vec<usize>,
    #[serde(default)]
    dyn_dims: Vec<DynamicDimension>,
    #[serde(default)]
    sub_shapes: Vec<Shape>,
}

impl TryFrom<ShapeRecord> for Shape {
    type Error = IrError;

    fn try_from(r: ShapeRecord) -> Result<Self, IrError> {
        let invalid = |message: String| Err(IrError::InvalidRecord(message));
        if r.lens.len() != r.strides.len() {
            return invalid(format!(
                "shape has {} lens but {} strides",
                r.lens.len(),
                r.strides.len()
            ));
        }
        let is_tuple = r.ty == ElementType::Tuple;
        if (is_tuple || !r.dyn_dims.is_empty()) && !r.lens.is_empty() {
            return invalid("tuple and dynamic shapes cannot carry lens".into());
        }
        if !r.sub_shapes.is_empty() && !is_tuple {
            return invalid(format!("{} shape cannot carry sub-shapes", r.ty));
        }
        if is_tuple && !r.dyn_dims.is_empty() {
            return invalid("tuple shapes cannot carry dynamic dimensions".into());
        }
        if let Some(d) = r.dyn_dims.iter().find(|d| d.min > d.max) {
            return invalid(format!("dynamic dimension {d} has min above max"));
        }
        let shape = Self {
            ty: r.ty,
            lens: r.lens,
            strides: r.strides,
            dyn_dims: r.dyn_dims,
            sub_shapes: r.sub_shapes,
        };
        if !shape.addressable() {
            return invalid(format!("shape {{{shape}}} is too large"));
        }
        Ok(shape)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_tuple() {
            f.write_str("[")?;
            for (i, s) in self.sub_shapes.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{s}")?;
            }
            return f.write_str("]");
        }
        if self.dynamic_shape() {
            let dims: Vec<String> = self.dyn_dims.iter().map(|d| d.to_string()).collect();
            return write!(f, "{}, {{{}}}", self.ty, dims.join(", "));
        }
        write!(
            f,
            "{}, {{{}}}, {{{}}}",
            self.ty,
            join(&self.lens),
            join(&self.strides)
        )
    }
}

fn join(values: &[usize]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_shape_strides() {
        let s = Shape::new(ElementType::Float, vec![1, 3, 8, 8]);
        assert_eq!(s.strides(), &[192, 64, 8, 1]);
        assert!(s.standard());
        assert!(s.packed());
        assert!(!s.broadcasted());
        assert_eq!(s.elements(), 192);
        assert_eq!(s.bytes(), 768);
    }

    #[test]
    fn transposed_shape_is_packed_but_not_standard() {
        let s = Shape::with_strides(ElementType::Float, vec![3, 2], vec![1, 3]);
        assert!(s.packed());
        assert!(s.transposed());
        assert!(!s.standard());
    }

    #[test]
    fn broadcast_shape() {
        let s = Shape::with_strides(ElementType::Float, vec![4, 3], vec![0, 1]);
        assert!(s.broadcasted());
        assert!(!s.packed());
        assert!(!s.standard());
        assert_eq!(s.element_space(), 3);
    }

    #[test]
    fn sliced_shape_is_not_packed() {
        let s = Shape::with_strides(ElementType::Float, vec![2, 2], vec![4, 1]);
        assert!(!s.packed());
        assert!(!s.transposed());
    }

    #[test]
    fn unit_axes_do_not_affect_transposed() {
        let s = Shape::with_strides(ElementType::Float, vec![1, 4], vec![1, 1]);
        assert!(s.standard());
    }

    #[test]
    fn structural_equality() {
        let a = Shape::new(ElementType::Float, vec![2, 3]);
        let b = Shape::new(ElementType::Float, vec![2, 3]);
        let c = Shape::new(ElementType::Half, vec![2, 3]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.with_type(ElementType::Half), c);
    }

    #[test]
    fn dynamic_shape_queries() {
        let s = Shape::dynamic(
            ElementType::Float,
            vec![DynamicDimension::new(1, 4), DynamicDimension::fixed(8)],
        );
        assert!(s.dynamic_shape());
        assert_eq!(s.ndim(), 2);
        assert_eq!(s.elements(), 0);
        assert_eq!(s.max_lens(), vec![4, 8]);
        assert!(!s.standard());
        assert_eq!(s.to_string(), "float_type, {[1, 4], [8, 8]}");
    }

    #[test]
    fn tuple_shape() {
        let t = Shape::tuple(vec![
            Shape::new(ElementType::Float, vec![2]),
            Shape::new(ElementType::Int64, vec![1]),
        ]);
        assert!(t.is_tuple());
        assert_eq!(t.elements(), 0);
        assert_eq!(t.bytes(), 16);
        assert_eq!(t.sub_shapes().len(), 2);
    }

    #[test]
    fn multi_index_and_offset() {
        let s = Shape::with_strides(ElementType::Float, vec![2, 3], vec![1, 2]);
        let idx = s.multi_index(4);
        assert_eq!(idx, vec![1, 1]);
        assert_eq!(s.offset(&idx), 3);
    }

    #[test]
    fn display_static_shape() {
        let s = Shape::new(ElementType::Float, vec![2, 3]);
        assert_eq!(s.to_string(), "float_type, {2, 3}, {3, 1}");
    }

    #[test]
    fn cast_saturates_integers() {
        assert_eq!(ElementType::Int8.cast(300.0), 127.0);
        assert_eq!(ElementType::Int8.cast(-1.7), -1.0);
        assert_eq!(ElementType::Uint8.cast(-5.0), 0.0);
        assert_eq!(ElementType::Bool.cast(0.3), 1.0);
        assert_eq!(ElementType::Double.cast(0.1), 0.1);
    }

    #[test]
    fn deserialized_strides_must_match_lens() {
        let err = serde_json::from_str::<Shape>(r#"{"ty":"float","lens":[2,3],"strides":[]}"#)
            .unwrap_err();
        assert!(err.to_string().contains("2 lens but 0 strides"), "{err}");

        let ok: Shape =
            serde_json::from_str(r#"{"ty":"float","lens":[2,3],"strides":[1,2]}"#).unwrap();
        assert!(ok.transposed());
    }

    #[test]
    fn oversized_shapes_are_rejected() {
        let json = format!(r#"{{"ty":"float","lens":[{0},{0}],"strides":[{0},1]}}"#, usize::MAX / 2);
        assert!(serde_json::from_str::<Shape>(&json).is_err());
        assert!(!Shape::new(ElementType::Float, vec![usize::MAX, 2]).addressable());
        assert!(Shape::new(ElementType::Float, vec![1, 3, 8, 8]).addressable());
    }
}
