//! Constant tensor values.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::IrError;
use crate::shape::{ElementType, Shape};

/// A constant tensor.
///
/// Values are stored as `f64` in logical row-major order regardless of the
/// shape's strides, already cast into the element type's domain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "LiteralRecord")]
pub struct Literal {
    shape: Shape,
    data: Vec<f64>,
}

impl Literal {
    /// Builds a literal, casting every value to `shape`'s element type.
    ///
    /// A single value is splatted across all elements.
    ///
    /// # Panics
    ///
    /// Panics if `data` has neither one nor `shape.elements()` values.
    pub fn new(shape: Shape, data: impl Into<Vec<f64>>) -> Self {
        match Self::try_new(shape, data) {
            Ok(lit) => lit,
            Err(e) => panic!("Literal::new: {e}"),
        }
    }

    /// Like [`Literal::new`], but reports a value count mismatch as
    /// [`IrError::InvalidRecord`].
    pub fn try_new(shape: Shape, data: impl Into<Vec<f64>>) -> Result<Self, IrError> {
        let mut data = data.into();
        let n = shape.elements();
        if data.len() == 1 && n != 1 {
            data = vec![data[0]; n];
        }
        if data.len() != n {
            return Err(IrError::InvalidRecord(format!(
                "{} values for shape {{{shape}}}",
                data.len()
            )));
        }
        let ty = shape.ty();
        let data = data.into_iter().map(|v| ty.cast(v)).collect();
        Ok(Self {
            shape: shape.as_standard(),
            data,
        })
    }

    /// A one-element literal.
    pub fn scalar(ty: ElementType, value: f64) -> Self {
        Self::new(Shape::scalar(ty), vec![value])
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Returns `true` if every element equals `value` within a relative tolerance.
    pub fn all_equal(&self, value: f64) -> bool {
        !self.data.is_empty() && self.data.iter().all(|&v| float_equal(v, value))
    }

    /// The single value of a one-element literal.
    pub fn as_scalar(&self) -> Option<f64> {
        match self.data.as_slice() {
            [v] => Some(*v),
            _ => None,
        }
    }
}

/// Tolerant float comparison used for constant matching.
pub fn float_equal(a: f64, b: f64) -> bool {
    if a == b {
        return true;
    }
    let scale = a.abs().max(b.abs()).max(1.0);
    (a - b).abs() <= scale * 1e-6
}

#[derive(Deserialize)]
struct LiteralRecord {
    shape: Shape,
    data: Vec<f64>,
}

impl TryFrom<LiteralRecord> for Literal {
    type Error = IrError;

    fn try_from(r: LiteralRecord) -> Result<Self, IrError> {
        Self::try_new(r.shape, r.data)
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const MAX_SHOWN: usize = 8;
        f.write_str("{")?;
        for (i, v) in self.data.iter().take(MAX_SHOWN).enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{v}")?;
        }
        if self.data.len() > MAX_SHOWN {
            write!(f, ", ... ({} values)", self.data.len())?;
        }
        f.write_str("}")
    }
}
