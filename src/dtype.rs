use crate::onnx::tensor_proto::DataType;
use half::{bf16, f16};
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

#[derive(Debug, thiserror::Error)]
pub enum DTypeError {
    #[error("The onnx dtype {0:?} is not supported")]
    UnsupportedONNXDtype(DataType),
    #[error("Unknown onnx dtype code {0}")]
    UnknownONNXDtype(i32),
}

/// Element type of a tensor. Display names follow the ONNX type strings (`tensor(float)`).
#[derive(
    Copy, Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Serialize, Deserialize, strum_macros::EnumIter, strum_macros::Display,
)]
pub enum DType {
    #[strum(to_string = "double")]
    F64,
    #[strum(to_string = "float")]
    F32,
    #[strum(to_string = "bfloat16")]
    BF16,
    #[strum(to_string = "float16")]
    F16,
    #[strum(to_string = "uint64")]
    U64,
    #[strum(to_string = "int64")]
    I64,
    #[strum(to_string = "uint32")]
    U32,
    #[strum(to_string = "int32")]
    I32,
    #[strum(to_string = "uint16")]
    U16,
    #[strum(to_string = "int16")]
    I16,
    #[strum(to_string = "uint8")]
    U8,
    #[strum(to_string = "int8")]
    I8,
    #[strum(to_string = "bool")]
    BOOL,
    #[strum(to_string = "string")]
    STRING,
}

impl DType {
    /// Bytes charged per element. Strings count as one handle each.
    pub fn size(&self) -> usize {
        match self {
            DType::F64 | DType::U64 | DType::I64 => 8,
            DType::F32 | DType::U32 | DType::I32 => 4,
            DType::BF16 | DType::F16 | DType::U16 | DType::I16 => 2,
            DType::U8 | DType::I8 | DType::BOOL => 1,
            DType::STRING => size_of::<String>(),
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DType::F64 | DType::F32 | DType::BF16 | DType::F16)
    }

    pub fn is_integer(&self) -> bool {
        !self.is_float() && !matches!(self, DType::BOOL | DType::STRING)
    }

    pub fn onnx_type(&self) -> DataType {
        match self {
            DType::F64 => DataType::Double,
            DType::F32 => DataType::Float,
            DType::BF16 => DataType::Bfloat16,
            DType::F16 => DataType::Float16,
            DType::U64 => DataType::Uint64,
            DType::I64 => DataType::Int64,
            DType::U32 => DataType::Uint32,
            DType::I32 => DataType::Int32,
            DType::U16 => DataType::Uint16,
            DType::I16 => DataType::Int16,
            DType::U8 => DataType::Uint8,
            DType::I8 => DataType::Int8,
            DType::BOOL => DataType::Bool,
            DType::STRING => DataType::String,
        }
    }

    /// Maps a raw `TensorProto.data_type` value.
    pub fn from_onnx_code(code: i32) -> Result<Self, DTypeError> {
        let onnx_dtype = DataType::try_from(code).map_err(|_| DTypeError::UnknownONNXDtype(code))?;
        DType::try_from(onnx_dtype)
    }
}

impl TryFrom<DataType> for DType {
    type Error = DTypeError;
    fn try_from(onnx_dtype: DataType) -> Result<Self, DTypeError> {
        DType::iter()
            .find(|dtype| dtype.onnx_type() == onnx_dtype)
            .ok_or(DTypeError::UnsupportedONNXDtype(onnx_dtype))
    }
}

impl From<DType> for DataType {
    fn from(dtype: DType) -> Self {
        dtype.onnx_type()
    }
}

/// Ties a Rust element type to its [`DType`].
pub trait DTypeOfPrimitive {
    const DTYPE: DType;
}

macro_rules! dtype_of {
    ($($t:ty => $dtype:ident),* $(,)?) => {
        $(impl DTypeOfPrimitive for $t {
            const DTYPE: DType = DType::$dtype;
        })*
    };
}

dtype_of! {
    f64 => F64,
    f32 => F32,
    bf16 => BF16,
    f16 => F16,
    u64 => U64,
    i64 => I64,
    u32 => U32,
    i32 => I32,
    u16 => U16,
    i16 => I16,
    u8 => U8,
    i8 => I8,
    bool => BOOL,
    String => STRING,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn onnx_codes_map_both_ways() {
        for dtype in DType::iter() {
            let code = dtype.onnx_type() as i32;
            assert_eq!(DType::from_onnx_code(code).unwrap(), dtype);
        }
        assert!(matches!(DType::from_onnx_code(14), Err(DTypeError::UnsupportedONNXDtype(_))));
        assert!(matches!(DType::from_onnx_code(99), Err(DTypeError::UnknownONNXDtype(99))));
    }

    #[test]
    fn display_uses_onnx_names() {
        assert_eq!(DType::F32.to_string(), "float");
        assert_eq!(DType::BOOL.to_string(), "bool");
    }
}
