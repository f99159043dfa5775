use super::{broadcast_shapes, element_count, typed, Element, NumericElement, NumericTensor, NumericTensorError, StorageProvider};
use crate::dtype::{DType, DTypeOfPrimitive};
use ndarray::linalg::general_mat_mul;
use ndarray::{ArcArray, Array, Array3, ArrayView1, Axis, IxDyn, Zip};
use num_traits::{Float, Zero};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Mod { fmod: bool },
    Max,
    Min,
}

impl BinaryOp {
    fn apply<T: NumericElement>(&self, a: T, b: T) -> T {
        match self {
            BinaryOp::Add => a.num_add(b),
            BinaryOp::Sub => a.num_sub(b),
            BinaryOp::Mul => a.num_mul(b),
            BinaryOp::Div => a.num_div(b),
            BinaryOp::Pow => a.num_pow(b),
            BinaryOp::Mod { fmod } => a.num_mod(b, *fmod),
            BinaryOp::Max => a.num_max(b),
            BinaryOp::Min => a.num_min(b),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
pub enum CompareOp {
    Equal,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

impl CompareOp {
    fn apply<T: PartialOrd>(&self, a: &T, b: &T) -> bool {
        match self {
            CompareOp::Equal => a == b,
            CompareOp::Less => a < b,
            CompareOp::LessOrEqual => a <= b,
            CompareOp::Greater => a > b,
            CompareOp::GreaterOrEqual => a >= b,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
pub enum LogicalOp {
    And,
    Or,
    Xor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
pub enum UnaryOp {
    Neg,
    Abs,
    Sign,
    Relu,
    Sigmoid,
    Tanh,
    Exp,
    Log,
    Sqrt,
    Reciprocal,
    Floor,
    Ceil,
    Sin,
    Cos,
    Softplus,
}

impl UnaryOp {
    /// Whether the operator is defined on integer element types.
    pub fn supports_integers(&self) -> bool {
        matches!(self, UnaryOp::Neg | UnaryOp::Abs | UnaryOp::Sign | UnaryOp::Relu)
    }

    fn apply_numeric<T: NumericElement>(&self, x: T) -> T {
        match self {
            UnaryOp::Neg => x.num_neg(),
            UnaryOp::Abs => x.num_abs(),
            UnaryOp::Sign => x.num_sign(),
            UnaryOp::Relu => x.num_max(T::zero()),
            _ => x,
        }
    }

    fn apply_float<T: Float>(&self, x: T) -> T {
        match self {
            UnaryOp::Neg => -x,
            UnaryOp::Abs => x.abs(),
            UnaryOp::Sign => {
                if x.is_nan() || x == T::zero() { x } else { x.signum() }
            }
            UnaryOp::Relu => {
                if x < T::zero() { T::zero() } else { x }
            }
            UnaryOp::Sigmoid => T::one() / (T::one() + (-x).exp()),
            UnaryOp::Tanh => x.tanh(),
            UnaryOp::Exp => x.exp(),
            UnaryOp::Log => x.ln(),
            UnaryOp::Sqrt => x.sqrt(),
            UnaryOp::Reciprocal => x.recip(),
            UnaryOp::Floor => x.floor(),
            UnaryOp::Ceil => x.ceil(),
            UnaryOp::Sin => x.sin(),
            UnaryOp::Cos => x.cos(),
            UnaryOp::Softplus => (x.exp() + T::one()).ln(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
pub enum ReduceOp {
    Sum,
    Mean,
    Max,
    Min,
    Prod,
}

impl ReduceOp {
    fn fold<T: NumericElement>(&self, lane: ArrayView1<T>) -> T {
        match self {
            ReduceOp::Sum | ReduceOp::Mean => lane.iter().fold(T::zero(), |acc, v| acc.num_add(*v)),
            ReduceOp::Prod => lane.iter().fold(T::one(), |acc, v| acc.num_mul(*v)),
            ReduceOp::Max => lane.iter().fold(T::from_f64(f64::NEG_INFINITY), |acc, v| acc.num_max(*v)),
            ReduceOp::Min => lane.iter().fold(T::from_f64(f64::INFINITY), |acc, v| acc.num_min(*v)),
        }
    }
}

fn not_broadcastable(a: &[usize], b: &[usize]) -> NumericTensorError {
    NumericTensorError::NotBroadcastable(a.to_vec(), b.to_vec())
}

fn broadcast_zip_into<A: Element, B: Element, R: Element>(
    a: &ArcArray<A, IxDyn>,
    b: &ArcArray<B, IxDyn>,
    storage: &impl StorageProvider,
    f: impl Fn(&A, &B) -> R,
) -> Result<ArcArray<R, IxDyn>, NumericTensorError> {
    let shape = broadcast_shapes(a.shape(), b.shape()).ok_or_else(|| not_broadcastable(a.shape(), b.shape()))?;
    let av = a.broadcast(IxDyn(&shape)).ok_or_else(|| not_broadcastable(a.shape(), &shape))?;
    let bv = b.broadcast(IxDyn(&shape)).ok_or_else(|| not_broadcastable(b.shape(), &shape))?;
    let values = storage.zeroed::<R>(element_count(&shape, R::DTYPE)?)?;
    let mut out = Array::from_shape_vec(IxDyn(&shape), values)?;
    Zip::from(&mut out).and(&av).and(&bv).for_each(|o, x, y| *o = f(x, y));
    Ok(out.into_shared())
}

fn map_into<A: Element, R: Element>(
    a: &ArcArray<A, IxDyn>,
    storage: &impl StorageProvider,
    f: impl Fn(&A) -> R,
) -> Result<ArcArray<R, IxDyn>, NumericTensorError> {
    let values = storage.zeroed::<R>(a.len())?;
    let mut out = Array::from_shape_vec(IxDyn(a.shape()), values)?;
    Zip::from(&mut out).and(a).for_each(|o, x| *o = f(x));
    Ok(out.into_shared())
}

fn check_same_dtype(a: &NumericTensor, b: &NumericTensor) -> Result<DType, NumericTensorError> {
    if a.dtype() != b.dtype() {
        Err(NumericTensorError::MismatchedDTypes(a.dtype(), b.dtype()))
    } else {
        Ok(a.dtype())
    }
}

fn scalar_of<T: Element>(tensor: &NumericTensor) -> Result<T, NumericTensorError> {
    let x = typed::<T>(tensor)?;
    if x.len() != 1 {
        return Err(NumericTensorError::NotAScalar(x.shape().to_vec()));
    }
    x.iter().next().cloned().ok_or(NumericTensorError::NotAScalar(x.shape().to_vec()))
}

impl NumericTensor {
    pub fn binary(op: BinaryOp, a: &Self, b: &Self, storage: &impl StorageProvider) -> Result<Self, NumericTensorError> {
        let dtype = check_same_dtype(a, b)?;
        dispatch_numeric!(dtype, op, T => {
            let out = broadcast_zip_into(typed::<T>(a)?, typed::<T>(b)?, storage, |x: &T, y: &T| op.apply(*x, *y))?;
            Ok(T::wrap(out))
        })
    }

    pub fn add(a: &Self, b: &Self, storage: &impl StorageProvider) -> Result<Self, NumericTensorError> {
        Self::binary(BinaryOp::Add, a, b, storage)
    }

    pub fn sub(a: &Self, b: &Self, storage: &impl StorageProvider) -> Result<Self, NumericTensorError> {
        Self::binary(BinaryOp::Sub, a, b, storage)
    }

    pub fn mul(a: &Self, b: &Self, storage: &impl StorageProvider) -> Result<Self, NumericTensorError> {
        Self::binary(BinaryOp::Mul, a, b, storage)
    }

    pub fn div(a: &Self, b: &Self, storage: &impl StorageProvider) -> Result<Self, NumericTensorError> {
        Self::binary(BinaryOp::Div, a, b, storage)
    }

    pub fn compare(op: CompareOp, a: &Self, b: &Self, storage: &impl StorageProvider) -> Result<Self, NumericTensorError> {
        let dtype = check_same_dtype(a, b)?;
        dispatch_dtype!(dtype, T => {
            let out = broadcast_zip_into(typed::<T>(a)?, typed::<T>(b)?, storage, |x: &T, y: &T| op.apply(x, y))?;
            Ok(NumericTensor::BOOL(out))
        })
    }

    pub fn logical(op: LogicalOp, a: &Self, b: &Self, storage: &impl StorageProvider) -> Result<Self, NumericTensorError> {
        let (x, y) = match (a, b) {
            (NumericTensor::BOOL(x), NumericTensor::BOOL(y)) => (x, y),
            _ => {
                return Err(NumericTensorError::UnsupportedOperationForDTypes(
                    op.to_string(),
                    vec![a.dtype(), b.dtype()],
                ));
            }
        };
        let out = broadcast_zip_into(x, y, storage, |p: &bool, q: &bool| match op {
            LogicalOp::And => *p && *q,
            LogicalOp::Or => *p || *q,
            LogicalOp::Xor => *p != *q,
        })?;
        Ok(NumericTensor::BOOL(out))
    }

    pub fn not(&self, storage: &impl StorageProvider) -> Result<Self, NumericTensorError> {
        match self {
            NumericTensor::BOOL(x) => Ok(NumericTensor::BOOL(map_into(x, storage, |v: &bool| !*v)?)),
            other => Err(NumericTensorError::UnsupportedOperationForDTypes("Not".to_string(), vec![other.dtype()])),
        }
    }

    pub fn unary(&self, op: UnaryOp, storage: &impl StorageProvider) -> Result<Self, NumericTensorError> {
        let dtype = self.dtype();
        if dtype.is_float() {
            dispatch_float!(dtype, op, T => {
                let out = map_into(typed::<T>(self)?, storage, |x: &T| op.apply_float(*x))?;
                Ok(T::wrap(out))
            })
        } else if op.supports_integers() {
            dispatch_numeric!(dtype, op, T => {
                let out = map_into(typed::<T>(self)?, storage, |x: &T| op.apply_numeric(*x))?;
                Ok(T::wrap(out))
            })
        } else {
            Err(NumericTensorError::UnsupportedOperationForDTypes(op.to_string(), vec![dtype]))
        }
    }

    /// Reduces over `axes` (normalized, any order). An empty `axes` returns the input.
    pub fn reduce(&self, op: ReduceOp, axes: &[usize], keepdims: bool) -> Result<Self, NumericTensorError> {
        let rank = self.rank();
        let mut axes = axes.to_vec();
        axes.sort_unstable();
        axes.dedup();
        if let Some(&bad) = axes.iter().find(|&&a| a >= rank) {
            return Err(NumericTensorError::AxisOutOfRange(bad as i64, rank));
        }
        let count: usize = axes.iter().map(|&a| self.shape()[a]).product();
        dispatch_numeric!(self.dtype(), op, T => {
            let mut current: ArcArray<T, IxDyn> = typed::<T>(self)?.clone();
            for &axis in axes.iter().rev() {
                let reduced = current.map_axis(Axis(axis), |lane| op.fold(lane));
                current = if keepdims {
                    reduced.insert_axis(Axis(axis)).into_shared()
                } else {
                    reduced.into_shared()
                };
            }
            if op == ReduceOp::Mean && count > 0 {
                let divisor = T::from_f64(count as f64);
                current = current.mapv(|v| v.num_div(divisor)).into_shared();
            }
            Ok(T::wrap(current))
        })
    }

    pub fn softmax(&self, axis: usize) -> Result<Self, NumericTensorError> {
        if axis >= self.rank() {
            return Err(NumericTensorError::AxisOutOfRange(axis as i64, self.rank()));
        }
        dispatch_float!(self.dtype(), "Softmax", T => {
            let mut out = typed::<T>(self)?.to_owned();
            for mut lane in out.lanes_mut(Axis(axis)) {
                let max = lane.iter().fold(f64::NEG_INFINITY, |m, v| m.max(v.to_f64()));
                let exps: Vec<f64> = lane.iter().map(|v| (v.to_f64() - max).exp()).collect();
                let sum: f64 = exps.iter().sum();
                for (v, e) in lane.iter_mut().zip(exps) {
                    *v = T::from_f64(e / sum);
                }
            }
            Ok(T::wrap(out.into_shared()))
        })
    }

    /// Numpy `matmul`: rank-1 operands are promoted and the added axis removed afterwards,
    /// leading dimensions broadcast.
    pub fn matmul(a: &Self, b: &Self, storage: &impl StorageProvider) -> Result<Self, NumericTensorError> {
        let dtype = check_same_dtype(a, b)?;
        dispatch_numeric!(dtype, "MatMul", T => Ok(T::wrap(matmul_typed(typed::<T>(a)?, typed::<T>(b)?, storage)?)))
    }

    /// `alpha * op(a) @ op(b) + beta * c` over rank-2 operands, `c` unidirectionally broadcast.
    #[allow(clippy::too_many_arguments)]
    pub fn gemm(
        a: &Self,
        b: &Self,
        c: Option<&Self>,
        alpha: f64,
        beta: f64,
        trans_a: bool,
        trans_b: bool,
        storage: &impl StorageProvider,
    ) -> Result<Self, NumericTensorError> {
        let dtype = check_same_dtype(a, b)?;
        if let Some(c) = c {
            check_same_dtype(a, c)?;
        }
        if a.rank() != 2 || b.rank() != 2 {
            return Err(NumericTensorError::InvalidArgument(format!(
                "Gemm expects rank 2 operands, got {:?} and {:?}",
                a.shape(),
                b.shape()
            )));
        }
        let a = if trans_a { a.transpose(None)? } else { a.clone() };
        let b = if trans_b { b.transpose(None)? } else { b.clone() };
        dispatch_numeric!(dtype, "Gemm", T => {
            let av = typed::<T>(&a)?.view().into_dimensionality::<ndarray::Ix2>()?;
            let bv = typed::<T>(&b)?.view().into_dimensionality::<ndarray::Ix2>()?;
            let (m, k) = av.dim();
            let (k2, n) = bv.dim();
            if k != k2 {
                return Err(NumericTensorError::InvalidArgument(format!("Gemm inner dimensions {k} and {k2} differ")));
            }
            let values = storage.zeroed::<T>(m * n)?;
            let mut out = Array::from_shape_vec((m, n), values)?;
            let mut out_beta = T::zero();
            if let Some(c) = c {
                let cv = typed::<T>(c)?;
                let cb = cv.broadcast(IxDyn(&[m, n])).ok_or_else(|| not_broadcastable(cv.shape(), &[m, n]))?;
                let cb = cb.into_dimensionality::<ndarray::Ix2>()?;
                out.zip_mut_with(&cb, |o, v| *o = v.clone());
                out_beta = T::from_f64(beta);
            }
            general_mat_mul(T::from_f64(alpha), &av, &bv, out_beta, &mut out);
            Ok(T::wrap(out.into_dyn().into_shared()))
        })
    }

    /// Picks from `x` where `condition` holds and from `y` elsewhere, broadcasting all three.
    pub fn where_select(condition: &Self, x: &Self, y: &Self, storage: &impl StorageProvider) -> Result<Self, NumericTensorError> {
        let dtype = check_same_dtype(x, y)?;
        let cond = typed::<bool>(condition)?;
        let shape = broadcast_shapes(cond.shape(), x.shape())
            .and_then(|s| broadcast_shapes(&s, y.shape()))
            .ok_or_else(|| not_broadcastable(x.shape(), y.shape()))?;
        dispatch_dtype!(dtype, T => {
            let xa = typed::<T>(x)?;
            let ya = typed::<T>(y)?;
            let cv = cond.broadcast(IxDyn(&shape)).ok_or_else(|| not_broadcastable(cond.shape(), &shape))?;
            let xv = xa.broadcast(IxDyn(&shape)).ok_or_else(|| not_broadcastable(xa.shape(), &shape))?;
            let yv = ya.broadcast(IxDyn(&shape)).ok_or_else(|| not_broadcastable(ya.shape(), &shape))?;
            let values = storage.zeroed::<T>(element_count(&shape, T::DTYPE)?)?;
            let mut out = Array::from_shape_vec(IxDyn(&shape), values)?;
            Zip::from(&mut out).and(&cv).and(&xv).and(&yv).for_each(|o, c, a, b| {
                *o = if *c { a.clone() } else { b.clone() }
            });
            Ok(T::wrap(out.into_shared()))
        })
    }

    /// `start + i * delta` for every `i` below `ceil((limit - start) / delta)`.
    pub fn range(start: &Self, limit: &Self, delta: &Self) -> Result<Self, NumericTensorError> {
        check_same_dtype(start, limit)?;
        check_same_dtype(start, delta)?;
        dispatch_numeric!(start.dtype(), "Range", T => {
            let s = scalar_of::<T>(start)?;
            let l = scalar_of::<T>(limit)?;
            let d = scalar_of::<T>(delta)?;
            if !d.is_nonzero() {
                return Err(NumericTensorError::InvalidArgument("Range delta must be non-zero".to_string()));
            }
            let count = ((l.to_f64() - s.to_f64()) / d.to_f64()).ceil().max(0.0) as usize;
            element_count(&[count], T::DTYPE)?;
            let values: Vec<T> = (0..count)
                .map(|i| {
                    if T::IS_FLOAT {
                        T::from_f64(s.to_f64() + i as f64 * d.to_f64())
                    } else {
                        T::from_i64(s.to_i64().wrapping_add((i as i64).wrapping_mul(d.to_i64())))
                    }
                })
                .collect();
            Ok(NumericTensor::from_vec(values))
        })
    }
}

fn matmul_typed<T: NumericElement>(
    a: &ArcArray<T, IxDyn>,
    b: &ArcArray<T, IxDyn>,
    storage: &impl StorageProvider,
) -> Result<ArcArray<T, IxDyn>, NumericTensorError> {
    if a.ndim() == 0 || b.ndim() == 0 {
        return Err(NumericTensorError::InvalidArgument("MatMul operands must have rank >= 1".to_string()));
    }
    let a_was_vector = a.ndim() == 1;
    let b_was_vector = b.ndim() == 1;
    let a_view = if a_was_vector { a.view().insert_axis(Axis(0)) } else { a.view() };
    let b_view = if b_was_vector { b.view().insert_axis(Axis(1)) } else { b.view() };
    let (ar, br) = (a_view.ndim(), b_view.ndim());
    let (m, k) = (a_view.shape()[ar - 2], a_view.shape()[ar - 1]);
    let (k2, n) = (b_view.shape()[br - 2], b_view.shape()[br - 1]);
    if k != k2 {
        return Err(NumericTensorError::InvalidArgument(format!(
            "MatMul inner dimensions differ: {:?} x {:?}",
            a.shape(),
            b.shape()
        )));
    }
    let batch = broadcast_shapes(&a_view.shape()[..ar - 2], &b_view.shape()[..br - 2])
        .ok_or_else(|| not_broadcastable(a.shape(), b.shape()))?;
    let batch_len = element_count(&batch, T::DTYPE)?;
    let mut full_shape = batch.clone();
    full_shape.extend([m, n]);
    let out_len = element_count(&full_shape, T::DTYPE)?;

    let mut a_full = batch.clone();
    a_full.extend([m, k]);
    let mut b_full = batch.clone();
    b_full.extend([k, n]);
    let a_b = a_view.broadcast(IxDyn(&a_full)).ok_or_else(|| not_broadcastable(a.shape(), &a_full))?;
    let b_b = b_view.broadcast(IxDyn(&b_full)).ok_or_else(|| not_broadcastable(b.shape(), &b_full))?;
    let a3 = a_b.to_shape((batch_len, m, k))?;
    let b3 = b_b.to_shape((batch_len, k, n))?;

    let values = storage.zeroed::<T>(out_len)?;
    let mut out = Array3::from_shape_vec((batch_len, m, n), values)?;
    for i in 0..batch_len {
        let mut c = out.index_axis_mut(Axis(0), i);
        general_mat_mul(T::one(), &a3.index_axis(Axis(0), i), &b3.index_axis(Axis(0), i), T::zero(), &mut c);
    }

    let mut out_shape = batch;
    if !a_was_vector {
        out_shape.push(m);
    }
    if !b_was_vector {
        out_shape.push(n);
    }
    Ok(out.into_shape_with_order(IxDyn(&out_shape))?.into_shared())
}
