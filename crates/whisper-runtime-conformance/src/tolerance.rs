use serde::{Deserialize, Serialize};
use whisper_runtime::dtype::DType;
use whisper_runtime::numeric_tensor::NumericTensorError;
use whisper_runtime::{NumericTensor, Value};

#[derive(Debug, thiserror::Error)]
pub enum Mismatch {
    #[error("dtype {actual} does not match expected {expected}")]
    DType { actual: DType, expected: DType },
    #[error("shape {actual:?} does not match expected {expected:?}")]
    Shape { actual: Vec<usize>, expected: Vec<usize> },
    #[error("element {index}: {actual} is not within tolerance of {expected}")]
    Element { index: usize, actual: f64, expected: f64 },
    #[error("elements differ from the expected values")]
    Exact,
    #[error("got a {actual}, expected a {expected}")]
    Kind { actual: &'static str, expected: &'static str },
    #[error("sequence has {actual} items, expected {expected}")]
    Length { actual: usize, expected: usize },
    #[error("optional presence differs: got {actual}, expected {expected}")]
    Presence { actual: bool, expected: bool },
    #[error(transparent)]
    Tensor(#[from] NumericTensorError),
}

/// Accepted numeric error when comparing floating point outputs: `|a - e| <= atol + rtol * |e|`.
/// Integer, bool and string outputs always compare exactly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    pub rtol: f64,
    pub atol: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self { rtol: 1e-3, atol: 1e-7 }
    }
}

impl Tolerance {
    pub fn close(&self, actual: f64, expected: f64) -> bool {
        if actual.is_nan() || expected.is_nan() {
            return actual.is_nan() && expected.is_nan();
        }
        // Covers matching infinities, whose difference is NaN.
        if actual == expected {
            return true;
        }
        // An infinite bound would admit any value.
        if actual.is_infinite() || expected.is_infinite() {
            return false;
        }
        (actual - expected).abs() <= self.atol + self.rtol * expected.abs()
    }

    pub fn compare_tensors(&self, actual: &NumericTensor, expected: &NumericTensor) -> Result<(), Mismatch> {
        if actual.dtype() != expected.dtype() {
            return Err(Mismatch::DType {
                actual: actual.dtype(),
                expected: expected.dtype(),
            });
        }
        if actual.shape() != expected.shape() {
            return Err(Mismatch::Shape {
                actual: actual.shape().to_vec(),
                expected: expected.shape().to_vec(),
            });
        }
        if !actual.dtype().is_float() {
            return if actual == expected { Ok(()) } else { Err(Mismatch::Exact) };
        }
        let actual_values = actual.to_f64_vec()?;
        let expected_values = expected.to_f64_vec()?;
        for (index, (a, e)) in actual_values.iter().zip(&expected_values).enumerate() {
            if !self.close(*a, *e) {
                return Err(Mismatch::Element {
                    index,
                    actual: *a,
                    expected: *e,
                });
            }
        }
        Ok(())
    }

    pub fn compare_values(&self, actual: &Value, expected: &Value) -> Result<(), Mismatch> {
        match (actual, expected) {
            (Value::Tensor(a), Value::Tensor(e)) => self.compare_tensors(a, e),
            (Value::Sequence(a), Value::Sequence(e)) => {
                if a.len() != e.len() {
                    return Err(Mismatch::Length {
                        actual: a.len(),
                        expected: e.len(),
                    });
                }
                a.items().iter().zip(e.items()).try_for_each(|(a, e)| self.compare_tensors(a, e))
            }
            (Value::Optional(a), Value::Optional(e)) => match (a, e) {
                (Some(a), Some(e)) => self.compare_values(a, e),
                (None, None) => Ok(()),
                _ => Err(Mismatch::Presence {
                    actual: a.is_some(),
                    expected: e.is_some(),
                }),
            },
            _ => Err(Mismatch::Kind {
                actual: actual.kind_name(),
                expected: expected.kind_name(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_matches_nan_only() {
        let tolerance = Tolerance::default();
        assert!(tolerance.close(f64::NAN, f64::NAN));
        assert!(!tolerance.close(f64::NAN, 1.0));
        assert!(tolerance.close(f64::INFINITY, f64::INFINITY));
        assert!(!tolerance.close(f64::INFINITY, f64::NEG_INFINITY));
    }

    #[test]
    fn finite_never_matches_infinity() {
        let tolerance = Tolerance::default();
        assert!(!tolerance.close(1.0, f64::INFINITY));
        assert!(!tolerance.close(f64::MAX, f64::INFINITY));
        assert!(!tolerance.close(f64::INFINITY, 1.0));
        let actual = NumericTensor::from_vec(vec![0.0f32]);
        let expected = NumericTensor::from_vec(vec![f32::INFINITY]);
        assert!(matches!(
            tolerance.compare_tensors(&actual, &expected),
            Err(Mismatch::Element { index: 0, .. })
        ));
    }

    #[test]
    fn relative_error_scales_with_expected() {
        let tolerance = Tolerance::default();
        assert!(tolerance.close(1000.5, 1000.0));
        assert!(!tolerance.close(1.01, 1.0));
    }

    #[test]
    fn integers_compare_exactly() {
        let tolerance = Tolerance { rtol: 1.0, atol: 1.0 };
        let a = NumericTensor::from_vec(vec![1i64, 2, 3]);
        let b = NumericTensor::from_vec(vec![1i64, 2, 4]);
        assert!(matches!(tolerance.compare_tensors(&a, &b), Err(Mismatch::Exact)));
        assert!(tolerance.compare_tensors(&a, &a.clone()).is_ok());
    }

    #[test]
    fn dtype_and_shape_must_match() {
        let tolerance = Tolerance::default();
        let a = NumericTensor::from_vec(vec![1f32, 2.0]);
        let b = NumericTensor::from_vec(vec![1f64, 2.0]);
        assert!(matches!(tolerance.compare_tensors(&a, &b), Err(Mismatch::DType { .. })));
        let c = NumericTensor::from_vec_shape(vec![1f32, 2.0], vec![2, 1]).unwrap();
        assert!(matches!(tolerance.compare_tensors(&a, &c), Err(Mismatch::Shape { .. })));
    }
}
