use super::ShapeInferenceError;
use crate::dtype::DType;
use crate::types::{Dimension, TensorType};

fn broadcast_dim(a: &Dimension, b: &Dimension) -> Option<Dimension> {
    Some(match (a, b) {
        (Dimension::Known(x), Dimension::Known(y)) => {
            if x == y || *y == 1 {
                Dimension::Known(*x)
            } else if *x == 1 {
                Dimension::Known(*y)
            } else {
                return None;
            }
        }
        (Dimension::Known(1), other) | (other, Dimension::Known(1)) => other.clone(),
        // The unknown side must be 1 or equal, either way the known size wins.
        (Dimension::Known(x), _) | (_, Dimension::Known(x)) => Dimension::Known(*x),
        (Dimension::Symbolic(x), Dimension::Symbolic(y)) if x == y => Dimension::Symbolic(x.clone()),
        _ => Dimension::Unknown,
    })
}

/// Numpy-style multidirectional broadcast of two partially known shapes, aligned from the
/// trailing dimension. An unknown rank on either side yields an unknown rank.
pub fn broadcast_shapes(a: &[Dimension], b: &[Dimension]) -> Option<Vec<Dimension>> {
    let rank = a.len().max(b.len());
    let one = Dimension::Known(1);
    (0..rank)
        .map(|i| {
            let da = if i < rank - a.len() { &one } else { &a[i - (rank - a.len())] };
            let db = if i < rank - b.len() { &one } else { &b[i - (rank - b.len())] };
            broadcast_dim(da, db)
        })
        .collect()
}

pub fn merge_dtypes(a: Option<DType>, b: Option<DType>) -> Result<Option<DType>, ShapeInferenceError> {
    match (a, b) {
        (Some(x), Some(y)) if x != y => Err(ShapeInferenceError::DTypeMismatch(x, y)),
        (x, y) => Ok(x.or(y)),
    }
}

pub fn broadcast_types(a: &TensorType, b: &TensorType) -> Result<TensorType, ShapeInferenceError> {
    let dtype = merge_dtypes(a.dtype, b.dtype)?;
    let shape = match (&a.shape, &b.shape) {
        (Some(x), Some(y)) => {
            Some(broadcast_shapes(x, y).ok_or_else(|| ShapeInferenceError::NotBroadcastable(a.clone(), b.clone()))?)
        }
        _ => None,
    };
    Ok(TensorType { dtype, shape })
}

/// Broadcast of any number of operands, as used by variadic operators.
pub fn broadcast_all(types: &[TensorType]) -> Result<TensorType, ShapeInferenceError> {
    let Some((first, rest)) = types.split_first() else {
        return Ok(TensorType::unknown());
    };
    rest.iter().try_fold(first.clone(), |acc, t| broadcast_types(&acc, t))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known(dims: &[usize]) -> TensorType {
        TensorType::known(DType::F32, dims)
    }

    #[test]
    fn broadcasts_unit_dimensions() {
        let out = broadcast_types(&known(&[3, 1]), &known(&[1, 4])).unwrap();
        assert_eq!(out, known(&[3, 4]));
        let out = broadcast_types(&known(&[5, 3, 4]), &known(&[4])).unwrap();
        assert_eq!(out, known(&[5, 3, 4]));
    }

    #[test]
    fn rejects_incompatible_dimensions() {
        assert!(matches!(
            broadcast_types(&known(&[3, 4]), &known(&[2, 4])),
            Err(ShapeInferenceError::NotBroadcastable(..))
        ));
    }

    #[test]
    fn partial_shapes_stay_partial() {
        let a = TensorType::new(Some(DType::F32), Some(vec![Dimension::Symbolic("N".into()), Dimension::Known(1)]));
        let b = TensorType::new(Some(DType::F32), Some(vec![Dimension::Unknown, Dimension::Known(7)]));
        let out = broadcast_types(&a, &b).unwrap();
        assert_eq!(out.shape, Some(vec![Dimension::Unknown, Dimension::Known(7)]));

        let unranked = TensorType::with_dtype(DType::F32);
        assert_eq!(broadcast_types(&a, &unranked).unwrap().shape, None);
    }

    #[test]
    fn dtype_mismatch_fails() {
        let a = TensorType::known(DType::F32, &[2]);
        let b = TensorType::known(DType::I64, &[2]);
        assert!(matches!(broadcast_types(&a, &b), Err(ShapeInferenceError::DTypeMismatch(..))));
    }
}
