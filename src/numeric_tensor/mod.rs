mod convert;
pub mod element;
pub mod ops;

pub use element::{Element, NumericElement, TypedStorage};
pub use ops::{BinaryOp, CompareOp, LogicalOp, ReduceOp, UnaryOp};

use crate::buffer::AllocationError;
use crate::dtype::DType;
use half::{bf16, f16};
use ndarray::{ArcArray, Axis, IxDyn, Slice};
use std::fmt::{Display, Formatter};

#[derive(Debug, thiserror::Error)]
pub enum NumericTensorError {
    #[error("Requested dtype {0}, but had dtype {1}")]
    WrongDTypeError(DType, DType),
    #[error("Mismatched dtypes {0} and {1}")]
    MismatchedDTypes(DType, DType),
    #[error("Cannot reshape tensor from {0:?} to {1:?}")]
    InvalidReshapeError(Vec<usize>, Vec<usize>),
    #[error("Shapes {0:?} and {1:?} are not broadcastable")]
    NotBroadcastable(Vec<usize>, Vec<usize>),
    #[error("Unsupported operation {0} for dtypes {1:?}")]
    UnsupportedOperationForDTypes(String, Vec<DType>),
    #[error("Cannot cast from {0} to {1}")]
    InvalidCastOperation(DType, DType),
    #[error("Cannot parse \"{0}\" as {1}")]
    InvalidStringCast(String, DType),
    #[error("Axis {0} out of range for rank {1}")]
    AxisOutOfRange(i64, usize),
    #[error("Index {0} out of range for dimension of size {1}")]
    IndexOutOfRange(i64, usize),
    #[error("Invalid permutation {0:?} for rank {1}")]
    InvalidPermutation(Vec<usize>, usize),
    #[error("Cannot squeeze axis {0} of size {1}")]
    InvalidSqueeze(usize, usize),
    #[error("Expected a scalar or single element tensor, got shape {0:?}")]
    NotAScalar(Vec<usize>),
    #[error("Raw data length {0} does not match {1} elements of {2}")]
    RawDataLength(usize, usize, DType),
    #[error("Cannot operate on an empty list of tensors")]
    EmptyInput,
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    ShapeError(#[from] ndarray::ShapeError),
    #[error(transparent)]
    Allocation(#[from] AllocationError),
}

/// Supplies zero-initialized element storage for operation outputs.
pub trait StorageProvider {
    fn zeroed<T: Element>(&self, len: usize) -> Result<Vec<T>, AllocationError>;
}

/// Allocates fresh storage on every request.
#[derive(Debug, Default, Clone, Copy)]
pub struct FreshStorage;

impl StorageProvider for FreshStorage {
    fn zeroed<T: Element>(&self, len: usize) -> Result<Vec<T>, AllocationError> {
        Ok(vec![T::default(); len])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NumericTensor {
    F64(ArcArray<f64, IxDyn>),
    F32(ArcArray<f32, IxDyn>),
    BF16(ArcArray<bf16, IxDyn>),
    F16(ArcArray<f16, IxDyn>),
    U64(ArcArray<u64, IxDyn>),
    I64(ArcArray<i64, IxDyn>),
    U32(ArcArray<u32, IxDyn>),
    I32(ArcArray<i32, IxDyn>),
    U16(ArcArray<u16, IxDyn>),
    I16(ArcArray<i16, IxDyn>),
    U8(ArcArray<u8, IxDyn>),
    I8(ArcArray<i8, IxDyn>),
    BOOL(ArcArray<bool, IxDyn>),
    STRING(ArcArray<String, IxDyn>),
}

impl Display for NumericTensor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            NumericTensor::F64(x) => x.fmt(f),
            NumericTensor::F32(x) => x.fmt(f),
            NumericTensor::BF16(x) => x.fmt(f),
            NumericTensor::F16(x) => x.fmt(f),
            NumericTensor::U64(x) => x.fmt(f),
            NumericTensor::I64(x) => x.fmt(f),
            NumericTensor::U32(x) => x.fmt(f),
            NumericTensor::I32(x) => x.fmt(f),
            NumericTensor::U16(x) => x.fmt(f),
            NumericTensor::I16(x) => x.fmt(f),
            NumericTensor::U8(x) => x.fmt(f),
            NumericTensor::I8(x) => x.fmt(f),
            NumericTensor::BOOL(x) => x.fmt(f),
            NumericTensor::STRING(x) => x.fmt(f),
        }
    }
}

/// Borrows the typed array behind `tensor`, failing if it holds another dtype.
pub(crate) fn typed<T: Element>(tensor: &NumericTensor) -> Result<&ArcArray<T, IxDyn>, NumericTensorError> {
    T::unwrap(tensor).ok_or(NumericTensorError::WrongDTypeError(T::DTYPE, tensor.dtype()))
}

/// Element count of a `dtype` tensor of `shape`, failing when the count or its byte size
/// does not fit in `usize`.
pub fn element_count(shape: &[usize], dtype: DType) -> Result<usize, AllocationError> {
    if shape.contains(&0) {
        return Ok(0);
    }
    shape
        .iter()
        .try_fold(1usize, |acc, d| acc.checked_mul(*d))
        .filter(|count| count.checked_mul(dtype.size()).is_some())
        .ok_or_else(|| AllocationError::SizeOverflow {
            shape: shape.to_vec(),
            dtype,
        })
}

/// Normalizes a possibly negative axis against `rank`.
pub fn normalize_axis(axis: i64, rank: usize) -> Result<usize, NumericTensorError> {
    let adjusted = if axis < 0 { axis + rank as i64 } else { axis };
    if adjusted < 0 || adjusted >= rank as i64 {
        Err(NumericTensorError::AxisOutOfRange(axis, rank))
    } else {
        Ok(adjusted as usize)
    }
}

/// Numpy-style broadcast of two concrete shapes.
pub fn broadcast_shapes(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
    let rank = a.len().max(b.len());
    let mut out = vec![0; rank];
    for i in 0..rank {
        let da = if i < rank - a.len() { 1 } else { a[i - (rank - a.len())] };
        let db = if i < rank - b.len() { 1 } else { b[i - (rank - b.len())] };
        out[i] = if da == db {
            da
        } else if da == 1 {
            db
        } else if db == 1 {
            da
        } else {
            return None;
        };
    }
    Some(out)
}

impl NumericTensor {
    pub fn from_vec_shape<T: Element>(values: Vec<T>, shape: Vec<usize>) -> Result<Self, NumericTensorError> {
        Ok(T::wrap(ArcArray::from_shape_vec(IxDyn(&shape), values)?))
    }

    pub fn from_vec<T: Element>(values: Vec<T>) -> Self {
        T::wrap(ndarray::Array1::from(values).into_dyn().into_shared())
    }

    pub fn from_scalar<T: Element>(value: T) -> Self {
        T::wrap(ndarray::arr0(value).into_dyn().into_shared())
    }

    pub fn zeros(shape: &[usize], dtype: DType, storage: &impl StorageProvider) -> Result<Self, NumericTensorError> {
        let len = element_count(shape, dtype)?;
        dispatch_dtype!(dtype, T => {
            let values = storage.zeroed::<T>(len)?;
            Self::from_vec_shape(values, shape.to_vec())
        })
    }

    pub fn dtype(&self) -> DType {
        match self {
            NumericTensor::F64(_) => DType::F64,
            NumericTensor::F32(_) => DType::F32,
            NumericTensor::BF16(_) => DType::BF16,
            NumericTensor::F16(_) => DType::F16,
            NumericTensor::U64(_) => DType::U64,
            NumericTensor::I64(_) => DType::I64,
            NumericTensor::U32(_) => DType::U32,
            NumericTensor::I32(_) => DType::I32,
            NumericTensor::U16(_) => DType::U16,
            NumericTensor::I16(_) => DType::I16,
            NumericTensor::U8(_) => DType::U8,
            NumericTensor::I8(_) => DType::I8,
            NumericTensor::BOOL(_) => DType::BOOL,
            NumericTensor::STRING(_) => DType::STRING,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            NumericTensor::F64(x) => x.shape(),
            NumericTensor::F32(x) => x.shape(),
            NumericTensor::BF16(x) => x.shape(),
            NumericTensor::F16(x) => x.shape(),
            NumericTensor::U64(x) => x.shape(),
            NumericTensor::I64(x) => x.shape(),
            NumericTensor::U32(x) => x.shape(),
            NumericTensor::I32(x) => x.shape(),
            NumericTensor::U16(x) => x.shape(),
            NumericTensor::I16(x) => x.shape(),
            NumericTensor::U8(x) => x.shape(),
            NumericTensor::I8(x) => x.shape(),
            NumericTensor::BOOL(x) => x.shape(),
            NumericTensor::STRING(x) => x.shape(),
        }
    }

    pub fn rank(&self) -> usize {
        self.shape().len()
    }

    pub fn num_elements(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn size_bytes(&self) -> usize {
        self.num_elements() * self.dtype().size()
    }

    /// Elements in logical (row-major) order.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>, NumericTensorError> {
        Ok(typed::<T>(self)?.iter().cloned().collect())
    }

    pub fn to_f64_vec(&self) -> Result<Vec<f64>, NumericTensorError> {
        self.cast(DType::F64)?.to_vec::<f64>()
    }

    pub fn to_i64_vec(&self) -> Result<Vec<i64>, NumericTensorError> {
        if self.dtype() == DType::I64 {
            return self.to_vec::<i64>();
        }
        self.cast(DType::I64)?.to_vec::<i64>()
    }

    pub fn scalar_i64(&self) -> Result<i64, NumericTensorError> {
        let values = self.to_i64_vec()?;
        match values.as_slice() {
            [v] => Ok(*v),
            _ => Err(NumericTensorError::NotAScalar(self.shape().to_vec())),
        }
    }

    pub fn scalar_f64(&self) -> Result<f64, NumericTensorError> {
        let values = self.to_f64_vec()?;
        match values.as_slice() {
            [v] => Ok(*v),
            _ => Err(NumericTensorError::NotAScalar(self.shape().to_vec())),
        }
    }

    /// Truthiness of a single element tensor, as used by `If` and `Loop` conditions.
    pub fn scalar_bool(&self) -> Result<bool, NumericTensorError> {
        if self.num_elements() != 1 {
            return Err(NumericTensorError::NotAScalar(self.shape().to_vec()));
        }
        match self {
            NumericTensor::BOOL(x) => Ok(x.iter().next().copied().unwrap_or(false)),
            NumericTensor::STRING(_) => Err(NumericTensorError::UnsupportedOperationForDTypes(
                "scalar_bool".to_string(),
                vec![DType::STRING],
            )),
            other => Ok(other.scalar_f64()? != 0.0),
        }
    }

    /// Recovers the backing storage when this is the only handle to it.
    pub fn into_storage(self) -> Option<TypedStorage> {
        fn recover<T: Element>(tensor: NumericTensor) -> Option<TypedStorage> {
            let array = T::unwrap_owned(tensor).ok()?;
            let owned = array.try_into_owned_nocopy().ok()?;
            let (values, _offset) = owned.into_raw_vec_and_offset();
            Some(T::into_storage(values))
        }
        dispatch_dtype!(self.dtype(), T => recover::<T>(self))
    }

    pub fn cast(&self, dtype: DType) -> Result<Self, NumericTensorError> {
        if self.dtype() == dtype {
            return Ok(self.clone());
        }
        match self {
            NumericTensor::STRING(x) => dispatch_dtype!(dtype, D => {
                let parsed = x
                    .iter()
                    .map(|s| parse_string_element::<D>(s, dtype))
                    .collect::<Result<Vec<D>, _>>()?;
                Self::from_vec_shape(parsed, x.shape().to_vec())
            }),
            NumericTensor::BOOL(x) => match dtype {
                DType::STRING => Ok(NumericTensor::STRING(x.map(|v| if *v { "1" } else { "0" }.to_string()).into_shared())),
                _ => dispatch_numeric!(dtype, "Cast", D => Ok(D::wrap(x.map(|v| D::from_bool(*v)).into_shared()))),
            },
            _ => dispatch_numeric!(self.dtype(), "Cast", S => {
                let x = typed::<S>(self)?;
                match dtype {
                    DType::BOOL => Ok(NumericTensor::BOOL(x.map(|v| v.is_nonzero()).into_shared())),
                    DType::STRING => Ok(NumericTensor::STRING(x.map(|v| format_element(*v)).into_shared())),
                    _ => dispatch_numeric!(dtype, "Cast", D => Ok(D::wrap(x.map(|v| convert_element::<S, D>(*v)).into_shared()))),
                }
            }),
        }
    }

    pub fn reshape(&self, shape: &[usize]) -> Result<Self, NumericTensorError> {
        if element_count(shape, self.dtype()).ok() != Some(self.num_elements()) {
            return Err(NumericTensorError::InvalidReshapeError(self.shape().to_vec(), shape.to_vec()));
        }
        fn go<T: Element>(t: &NumericTensor, shape: &[usize]) -> Result<NumericTensor, NumericTensorError> {
            Ok(T::wrap(typed::<T>(t)?.to_shape(IxDyn(shape))?.to_shared()))
        }
        dispatch_dtype!(self.dtype(), T => go::<T>(self, shape))
    }

    pub fn transpose(&self, perm: Option<&[usize]>) -> Result<Self, NumericTensorError> {
        let rank = self.rank();
        let perm: Vec<usize> = match perm {
            Some(p) => p.to_vec(),
            None => (0..rank).rev().collect(),
        };
        let mut seen = vec![false; rank];
        if perm.len() != rank || perm.iter().any(|&p| p >= rank || std::mem::replace(&mut seen[p], true)) {
            return Err(NumericTensorError::InvalidPermutation(perm, rank));
        }
        fn go<T: Element>(t: &NumericTensor, perm: &[usize]) -> Result<NumericTensor, NumericTensorError> {
            Ok(T::wrap(typed::<T>(t)?.clone().permuted_axes(IxDyn(perm))))
        }
        dispatch_dtype!(self.dtype(), T => go::<T>(self, &perm))
    }

    /// Materializes this tensor broadcast to `shape`, drawing the output from `storage`.
    pub fn broadcast_to(&self, shape: &[usize], storage: &impl StorageProvider) -> Result<Self, NumericTensorError> {
        let len = element_count(shape, self.dtype())?;
        fn go<T: Element>(
            t: &NumericTensor,
            shape: &[usize],
            len: usize,
            storage: &impl StorageProvider,
        ) -> Result<NumericTensor, NumericTensorError> {
            let x = typed::<T>(t)?;
            let view = x
                .broadcast(IxDyn(shape))
                .ok_or_else(|| NumericTensorError::NotBroadcastable(x.shape().to_vec(), shape.to_vec()))?;
            let mut out = ndarray::Array::from_shape_vec(IxDyn(shape), storage.zeroed::<T>(len)?)?;
            out.assign(&view);
            Ok(T::wrap(out.into_shared()))
        }
        dispatch_dtype!(self.dtype(), T => go::<T>(self, shape, len, storage))
    }

    /// Inserts unit axes; `axes` are positions in the output and must be sorted and unique.
    pub fn unsqueeze(&self, axes: &[usize]) -> Result<Self, NumericTensorError> {
        let out_rank = self.rank() + axes.len();
        if let Some(&bad) = axes.iter().find(|&&a| a >= out_rank) {
            return Err(NumericTensorError::AxisOutOfRange(bad as i64, out_rank));
        }
        fn go<T: Element>(t: &NumericTensor, axes: &[usize]) -> Result<NumericTensor, NumericTensorError> {
            let mut x = typed::<T>(t)?.clone();
            for &axis in axes {
                x = x.insert_axis(Axis(axis));
            }
            Ok(T::wrap(x))
        }
        dispatch_dtype!(self.dtype(), T => go::<T>(self, axes))
    }

    /// Removes unit axes; with no axes given every unit axis is removed.
    pub fn squeeze(&self, axes: Option<&[usize]>) -> Result<Self, NumericTensorError> {
        let shape = self.shape().to_vec();
        let mut axes: Vec<usize> = match axes {
            Some(a) => a.to_vec(),
            None => shape.iter().enumerate().filter(|(_, d)| **d == 1).map(|(i, _)| i).collect(),
        };
        axes.sort_unstable();
        axes.dedup();
        for &axis in &axes {
            match shape.get(axis) {
                Some(1) => {}
                Some(&d) => return Err(NumericTensorError::InvalidSqueeze(axis, d)),
                None => return Err(NumericTensorError::AxisOutOfRange(axis as i64, shape.len())),
            }
        }
        fn go<T: Element>(t: &NumericTensor, axes: &[usize]) -> Result<NumericTensor, NumericTensorError> {
            let mut x = typed::<T>(t)?.clone();
            for &axis in axes.iter().rev() {
                x = x.index_axis_move(Axis(axis), 0);
            }
            Ok(T::wrap(x))
        }
        dispatch_dtype!(self.dtype(), T => go::<T>(self, &axes))
    }

    /// The sub-tensor at `index` along `axis`, with that axis removed.
    pub fn index_axis(&self, axis: usize, index: usize) -> Result<Self, NumericTensorError> {
        let shape = self.shape();
        let len = *shape.get(axis).ok_or(NumericTensorError::AxisOutOfRange(axis as i64, shape.len()))?;
        if index >= len {
            return Err(NumericTensorError::IndexOutOfRange(index as i64, len));
        }
        fn go<T: Element>(t: &NumericTensor, axis: usize, index: usize) -> Result<NumericTensor, NumericTensorError> {
            Ok(T::wrap(typed::<T>(t)?.index_axis(Axis(axis), index).to_owned().into_shared()))
        }
        dispatch_dtype!(self.dtype(), T => go::<T>(self, axis, index))
    }

    /// Slices each axis with an already normalized `Slice` (ndarray semantics).
    pub fn slice(&self, slices: &[Slice]) -> Result<Self, NumericTensorError> {
        if slices.len() != self.rank() {
            return Err(NumericTensorError::InvalidArgument(format!(
                "{} slices for rank {}",
                slices.len(),
                self.rank()
            )));
        }
        fn go<T: Element>(t: &NumericTensor, slices: &[Slice]) -> Result<NumericTensor, NumericTensorError> {
            let x = typed::<T>(t)?;
            Ok(T::wrap(x.slice_each_axis(|ax| slices[ax.axis.index()]).to_owned().into_shared()))
        }
        dispatch_dtype!(self.dtype(), T => go::<T>(self, slices))
    }

    pub fn concat(tensors: &[&NumericTensor], axis: usize) -> Result<Self, NumericTensorError> {
        let first = tensors.first().ok_or(NumericTensorError::EmptyInput)?;
        fn go<T: Element>(tensors: &[&NumericTensor], axis: usize) -> Result<NumericTensor, NumericTensorError> {
            let views = tensors
                .iter()
                .map(|t| typed::<T>(t).map(|x| x.view()))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(T::wrap(ndarray::concatenate(Axis(axis), &views)?.into_shared()))
        }
        dispatch_dtype!(first.dtype(), T => go::<T>(tensors, axis))
    }

    /// Joins equally shaped tensors along a new axis.
    pub fn stack(tensors: &[&NumericTensor], axis: usize) -> Result<Self, NumericTensorError> {
        let first = tensors.first().ok_or(NumericTensorError::EmptyInput)?;
        fn go<T: Element>(tensors: &[&NumericTensor], axis: usize) -> Result<NumericTensor, NumericTensorError> {
            let views = tensors
                .iter()
                .map(|t| typed::<T>(t).map(|x| x.view()))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(T::wrap(ndarray::stack(Axis(axis), &views)?.into_shared()))
        }
        dispatch_dtype!(first.dtype(), T => go::<T>(tensors, axis))
    }

    /// Gathers entries along `axis`. Negative indices count from the end.
    pub fn gather(&self, indices: &NumericTensor, axis: usize) -> Result<Self, NumericTensorError> {
        let shape = self.shape().to_vec();
        let len = *shape.get(axis).ok_or(NumericTensorError::AxisOutOfRange(axis as i64, shape.len()))?;
        let flat = indices
            .to_i64_vec()?
            .into_iter()
            .map(|i| {
                let adjusted = if i < 0 { i + len as i64 } else { i };
                if adjusted < 0 || adjusted >= len as i64 {
                    Err(NumericTensorError::IndexOutOfRange(i, len))
                } else {
                    Ok(adjusted as usize)
                }
            })
            .collect::<Result<Vec<usize>, _>>()?;
        let mut out_shape = shape[..axis].to_vec();
        out_shape.extend_from_slice(indices.shape());
        out_shape.extend_from_slice(&shape[axis + 1..]);
        fn go<T: Element>(
            t: &NumericTensor,
            axis: usize,
            flat: &[usize],
            out_shape: &[usize],
        ) -> Result<NumericTensor, NumericTensorError> {
            let selected = typed::<T>(t)?.select(Axis(axis), flat);
            Ok(T::wrap(selected.to_shape(IxDyn(out_shape))?.to_shared()))
        }
        dispatch_dtype!(self.dtype(), T => go::<T>(self, axis, &flat, &out_shape))
    }

    /// Splits along `axis` into consecutive chunks of the given sizes.
    pub fn split(&self, axis: usize, sizes: &[usize]) -> Result<Vec<Self>, NumericTensorError> {
        let rank = self.rank();
        let len = *self.shape().get(axis).ok_or(NumericTensorError::AxisOutOfRange(axis as i64, rank))?;
        if sizes.iter().sum::<usize>() != len {
            return Err(NumericTensorError::InvalidArgument(format!(
                "split sizes {sizes:?} do not sum to dimension {len}"
            )));
        }
        let mut start = 0;
        let mut out = Vec::with_capacity(sizes.len());
        for &size in sizes {
            let slices: Vec<Slice> = (0..rank)
                .map(|i| {
                    if i == axis {
                        Slice::from(start as isize..(start + size) as isize)
                    } else {
                        Slice::from(..)
                    }
                })
                .collect();
            out.push(self.slice(&slices)?);
            start += size;
        }
        Ok(out)
    }
}

fn convert_element<S: NumericElement, D: NumericElement>(v: S) -> D {
    if S::IS_FLOAT || D::IS_FLOAT {
        D::from_f64(v.to_f64())
    } else {
        D::from_i64(v.to_i64())
    }
}

fn format_element<S: NumericElement>(v: S) -> String {
    if S::IS_FLOAT {
        format!("{}", v.to_f64())
    } else if S::IS_SIGNED {
        format!("{}", v.to_i64())
    } else {
        format!("{}", v.to_i64() as u64)
    }
}

fn parse_string_element<D: Element>(s: &str, dtype: DType) -> Result<D, NumericTensorError> {
    let invalid = || NumericTensorError::InvalidStringCast(s.to_string(), dtype);
    let trimmed = s.trim();
    let tensor = match dtype {
        DType::STRING => NumericTensor::from_scalar(s.to_string()),
        DType::BOOL => {
            let v = match trimmed {
                "true" | "True" | "1" => true,
                "false" | "False" | "0" => false,
                _ => return Err(invalid()),
            };
            NumericTensor::from_scalar(v)
        }
        _ => {
            let v: f64 = match trimmed.to_ascii_lowercase().as_str() {
                "inf" | "+inf" | "infinity" => f64::INFINITY,
                "-inf" | "-infinity" => f64::NEG_INFINITY,
                "nan" => f64::NAN,
                other => other.parse().map_err(|_| invalid())?,
            };
            NumericTensor::from_scalar(v).cast(dtype)?
        }
    };
    D::unwrap(&tensor)
        .and_then(|x| x.iter().next().cloned())
        .ok_or_else(invalid)
}
