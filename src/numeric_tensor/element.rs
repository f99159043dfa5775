use super::NumericTensor;
use crate::dtype::{DType, DTypeOfPrimitive};
use half::{bf16, f16};
use ndarray::{ArcArray, IxDyn, LinalgScalar};
use num_traits::{One, Zero};
use std::fmt::Debug;

/// Type-erased backing storage of a tensor, used to recycle allocations across dtypes.
#[derive(Debug)]
pub enum TypedStorage {
    F64(Vec<f64>),
    F32(Vec<f32>),
    BF16(Vec<bf16>),
    F16(Vec<f16>),
    U64(Vec<u64>),
    I64(Vec<i64>),
    U32(Vec<u32>),
    I32(Vec<i32>),
    U16(Vec<u16>),
    I16(Vec<i16>),
    U8(Vec<u8>),
    I8(Vec<i8>),
    BOOL(Vec<bool>),
    STRING(Vec<String>),
}

impl TypedStorage {
    pub fn dtype(&self) -> DType {
        match self {
            TypedStorage::F64(_) => DType::F64,
            TypedStorage::F32(_) => DType::F32,
            TypedStorage::BF16(_) => DType::BF16,
            TypedStorage::F16(_) => DType::F16,
            TypedStorage::U64(_) => DType::U64,
            TypedStorage::I64(_) => DType::I64,
            TypedStorage::U32(_) => DType::U32,
            TypedStorage::I32(_) => DType::I32,
            TypedStorage::U16(_) => DType::U16,
            TypedStorage::I16(_) => DType::I16,
            TypedStorage::U8(_) => DType::U8,
            TypedStorage::I8(_) => DType::I8,
            TypedStorage::BOOL(_) => DType::BOOL,
            TypedStorage::STRING(_) => DType::STRING,
        }
    }

    /// Number of elements the storage can hold without reallocating.
    pub fn capacity(&self) -> usize {
        match self {
            TypedStorage::F64(x) => x.capacity(),
            TypedStorage::F32(x) => x.capacity(),
            TypedStorage::BF16(x) => x.capacity(),
            TypedStorage::F16(x) => x.capacity(),
            TypedStorage::U64(x) => x.capacity(),
            TypedStorage::I64(x) => x.capacity(),
            TypedStorage::U32(x) => x.capacity(),
            TypedStorage::I32(x) => x.capacity(),
            TypedStorage::U16(x) => x.capacity(),
            TypedStorage::I16(x) => x.capacity(),
            TypedStorage::U8(x) => x.capacity(),
            TypedStorage::I8(x) => x.capacity(),
            TypedStorage::BOOL(x) => x.capacity(),
            TypedStorage::STRING(x) => x.capacity(),
        }
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity() * self.dtype().size()
    }
}

/// Any element type a tensor can hold.
pub trait Element: Clone + Debug + PartialEq + PartialOrd + Default + Send + Sync + 'static + DTypeOfPrimitive {
    fn wrap(array: ArcArray<Self, IxDyn>) -> NumericTensor;
    fn unwrap(tensor: &NumericTensor) -> Option<&ArcArray<Self, IxDyn>>;
    fn unwrap_owned(tensor: NumericTensor) -> Result<ArcArray<Self, IxDyn>, NumericTensor>;
    fn into_storage(values: Vec<Self>) -> TypedStorage;
    fn from_storage(storage: TypedStorage) -> Result<Vec<Self>, TypedStorage>;
}

macro_rules! impl_element {
    ($t:ty, $variant:ident) => {
        impl Element for $t {
            fn wrap(array: ArcArray<Self, IxDyn>) -> NumericTensor {
                NumericTensor::$variant(array)
            }

            fn unwrap(tensor: &NumericTensor) -> Option<&ArcArray<Self, IxDyn>> {
                match tensor {
                    NumericTensor::$variant(x) => Some(x),
                    _ => None,
                }
            }

            fn unwrap_owned(tensor: NumericTensor) -> Result<ArcArray<Self, IxDyn>, NumericTensor> {
                match tensor {
                    NumericTensor::$variant(x) => Ok(x),
                    other => Err(other),
                }
            }

            fn into_storage(values: Vec<Self>) -> TypedStorage {
                TypedStorage::$variant(values)
            }

            fn from_storage(storage: TypedStorage) -> Result<Vec<Self>, TypedStorage> {
                match storage {
                    TypedStorage::$variant(x) => Ok(x),
                    other => Err(other),
                }
            }
        }
    };
}

impl_element!(f64, F64);
impl_element!(f32, F32);
impl_element!(bf16, BF16);
impl_element!(f16, F16);
impl_element!(u64, U64);
impl_element!(i64, I64);
impl_element!(u32, U32);
impl_element!(i32, I32);
impl_element!(u16, U16);
impl_element!(i16, I16);
impl_element!(u8, U8);
impl_element!(i8, I8);
impl_element!(bool, BOOL);
impl_element!(String, STRING);

/// Arithmetic over integer and float element types, with ONNX semantics:
/// integer arithmetic wraps, float min/max propagate NaN.
pub trait NumericElement: Element + Copy + LinalgScalar {
    const IS_FLOAT: bool;
    const IS_SIGNED: bool;

    fn to_f64(self) -> f64;
    fn from_f64(v: f64) -> Self;
    fn to_i64(self) -> i64;
    fn from_i64(v: i64) -> Self;

    fn from_bool(v: bool) -> Self {
        if v { Self::one() } else { Self::zero() }
    }

    fn is_nonzero(self) -> bool {
        self != Self::zero()
    }

    fn is_nan_value(self) -> bool {
        false
    }

    fn num_add(self, rhs: Self) -> Self;
    fn num_sub(self, rhs: Self) -> Self;
    fn num_mul(self, rhs: Self) -> Self;
    fn num_div(self, rhs: Self) -> Self;
    /// `fmod` selects C-style remainder (sign of the dividend) instead of the floored
    /// remainder (sign of the divisor). Floats always use `fmod` semantics.
    fn num_mod(self, rhs: Self, fmod: bool) -> Self;
    fn num_pow(self, rhs: Self) -> Self;
    fn num_neg(self) -> Self;
    fn num_abs(self) -> Self;
    fn num_sign(self) -> Self;

    fn num_max(self, rhs: Self) -> Self {
        if self.is_nan_value() || rhs.is_nan_value() {
            return if self.is_nan_value() { self } else { rhs };
        }
        if rhs > self { rhs } else { self }
    }

    fn num_min(self, rhs: Self) -> Self {
        if self.is_nan_value() || rhs.is_nan_value() {
            return if self.is_nan_value() { self } else { rhs };
        }
        if rhs < self { rhs } else { self }
    }
}

macro_rules! impl_float_element {
    ($t:ty, $from_f64:expr, $to_f64:expr) => {
        impl NumericElement for $t {
            const IS_FLOAT: bool = true;
            const IS_SIGNED: bool = true;

            fn to_f64(self) -> f64 {
                ($to_f64)(self)
            }
            fn from_f64(v: f64) -> Self {
                ($from_f64)(v)
            }
            fn to_i64(self) -> i64 {
                ($to_f64)(self) as i64
            }
            fn from_i64(v: i64) -> Self {
                ($from_f64)(v as f64)
            }
            fn is_nan_value(self) -> bool {
                num_traits::Float::is_nan(self)
            }
            fn num_add(self, rhs: Self) -> Self {
                self + rhs
            }
            fn num_sub(self, rhs: Self) -> Self {
                self - rhs
            }
            fn num_mul(self, rhs: Self) -> Self {
                self * rhs
            }
            fn num_div(self, rhs: Self) -> Self {
                self / rhs
            }
            fn num_mod(self, rhs: Self, _fmod: bool) -> Self {
                self % rhs
            }
            fn num_pow(self, rhs: Self) -> Self {
                num_traits::Float::powf(self, rhs)
            }
            fn num_neg(self) -> Self {
                -self
            }
            fn num_abs(self) -> Self {
                num_traits::Float::abs(self)
            }
            fn num_sign(self) -> Self {
                if num_traits::Float::is_nan(self) {
                    self
                } else if self > Self::zero() {
                    Self::one()
                } else if self < Self::zero() {
                    -Self::one()
                } else {
                    Self::zero()
                }
            }
        }
    };
}

impl_float_element!(f64, |v: f64| v, |x: f64| x);
impl_float_element!(f32, |v: f64| v as f32, |x: f32| x as f64);
impl_float_element!(bf16, bf16::from_f64, |x: bf16| x.to_f64());
impl_float_element!(f16, f16::from_f64, |x: f16| x.to_f64());

macro_rules! impl_signed_element {
    ($t:ty) => {
        impl NumericElement for $t {
            const IS_FLOAT: bool = false;
            const IS_SIGNED: bool = true;

            fn to_f64(self) -> f64 {
                self as f64
            }
            fn from_f64(v: f64) -> Self {
                v as $t
            }
            fn to_i64(self) -> i64 {
                self as i64
            }
            fn from_i64(v: i64) -> Self {
                v as $t
            }
            fn num_add(self, rhs: Self) -> Self {
                self.wrapping_add(rhs)
            }
            fn num_sub(self, rhs: Self) -> Self {
                self.wrapping_sub(rhs)
            }
            fn num_mul(self, rhs: Self) -> Self {
                self.wrapping_mul(rhs)
            }
            fn num_div(self, rhs: Self) -> Self {
                if rhs == 0 { 0 } else { self.wrapping_div(rhs) }
            }
            fn num_mod(self, rhs: Self, fmod: bool) -> Self {
                if rhs == 0 {
                    return 0;
                }
                let r = self.wrapping_rem(rhs);
                if !fmod && r != 0 && ((r < 0) != (rhs < 0)) {
                    r.wrapping_add(rhs)
                } else {
                    r
                }
            }
            fn num_pow(self, rhs: Self) -> Self {
                if rhs < 0 {
                    Self::from_f64((self as f64).powf(rhs as f64))
                } else {
                    self.wrapping_pow(rhs as u32)
                }
            }
            fn num_neg(self) -> Self {
                self.wrapping_neg()
            }
            fn num_abs(self) -> Self {
                self.wrapping_abs()
            }
            fn num_sign(self) -> Self {
                self.signum()
            }
        }
    };
}

impl_signed_element!(i64);
impl_signed_element!(i32);
impl_signed_element!(i16);
impl_signed_element!(i8);

macro_rules! impl_unsigned_element {
    ($t:ty) => {
        impl NumericElement for $t {
            const IS_FLOAT: bool = false;
            const IS_SIGNED: bool = false;

            fn to_f64(self) -> f64 {
                self as f64
            }
            fn from_f64(v: f64) -> Self {
                v as $t
            }
            fn to_i64(self) -> i64 {
                self as i64
            }
            fn from_i64(v: i64) -> Self {
                v as $t
            }
            fn num_add(self, rhs: Self) -> Self {
                self.wrapping_add(rhs)
            }
            fn num_sub(self, rhs: Self) -> Self {
                self.wrapping_sub(rhs)
            }
            fn num_mul(self, rhs: Self) -> Self {
                self.wrapping_mul(rhs)
            }
            fn num_div(self, rhs: Self) -> Self {
                if rhs == 0 { 0 } else { self / rhs }
            }
            fn num_mod(self, rhs: Self, _fmod: bool) -> Self {
                if rhs == 0 { 0 } else { self % rhs }
            }
            fn num_pow(self, rhs: Self) -> Self {
                self.wrapping_pow(rhs as u32)
            }
            fn num_neg(self) -> Self {
                self.wrapping_neg()
            }
            fn num_abs(self) -> Self {
                self
            }
            fn num_sign(self) -> Self {
                if self == 0 { 0 } else { 1 }
            }
        }
    };
}

impl_unsigned_element!(u64);
impl_unsigned_element!(u32);
impl_unsigned_element!(u16);
impl_unsigned_element!(u8);
