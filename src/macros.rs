/// Binds `$t` to the primitive type of `$dtype` and evaluates `$body` once per element type.
macro_rules! dispatch_dtype {
    ($dtype:expr, $t:ident => $body:expr) => {
        match $dtype {
            $crate::dtype::DType::F64 => { type $t = f64; $body }
            $crate::dtype::DType::F32 => { type $t = f32; $body }
            $crate::dtype::DType::BF16 => { type $t = half::bf16; $body }
            $crate::dtype::DType::F16 => { type $t = half::f16; $body }
            $crate::dtype::DType::U64 => { type $t = u64; $body }
            $crate::dtype::DType::I64 => { type $t = i64; $body }
            $crate::dtype::DType::U32 => { type $t = u32; $body }
            $crate::dtype::DType::I32 => { type $t = i32; $body }
            $crate::dtype::DType::U16 => { type $t = u16; $body }
            $crate::dtype::DType::I16 => { type $t = i16; $body }
            $crate::dtype::DType::U8 => { type $t = u8; $body }
            $crate::dtype::DType::I8 => { type $t = i8; $body }
            $crate::dtype::DType::BOOL => { type $t = bool; $body }
            $crate::dtype::DType::STRING => { type $t = String; $body }
        }
    };
}

/// Like `dispatch_dtype!` restricted to integer and float types; other dtypes produce
/// `NumericTensorError::UnsupportedOperationForDTypes`.
macro_rules! dispatch_numeric {
    ($dtype:expr, $op:expr, $t:ident => $body:expr) => {
        match $dtype {
            $crate::dtype::DType::F64 => { type $t = f64; $body }
            $crate::dtype::DType::F32 => { type $t = f32; $body }
            $crate::dtype::DType::BF16 => { type $t = half::bf16; $body }
            $crate::dtype::DType::F16 => { type $t = half::f16; $body }
            $crate::dtype::DType::U64 => { type $t = u64; $body }
            $crate::dtype::DType::I64 => { type $t = i64; $body }
            $crate::dtype::DType::U32 => { type $t = u32; $body }
            $crate::dtype::DType::I32 => { type $t = i32; $body }
            $crate::dtype::DType::U16 => { type $t = u16; $body }
            $crate::dtype::DType::I16 => { type $t = i16; $body }
            $crate::dtype::DType::U8 => { type $t = u8; $body }
            $crate::dtype::DType::I8 => { type $t = i8; $body }
            other => Err($crate::numeric_tensor::NumericTensorError::UnsupportedOperationForDTypes(
                $op.to_string(),
                vec![other],
            ))?,
        }
    };
}

macro_rules! dispatch_float {
    ($dtype:expr, $op:expr, $t:ident => $body:expr) => {
        match $dtype {
            $crate::dtype::DType::F64 => { type $t = f64; $body }
            $crate::dtype::DType::F32 => { type $t = f32; $body }
            $crate::dtype::DType::BF16 => { type $t = half::bf16; $body }
            $crate::dtype::DType::F16 => { type $t = half::f16; $body }
            other => Err($crate::numeric_tensor::NumericTensorError::UnsupportedOperationForDTypes(
                $op.to_string(),
                vec![other],
            ))?,
        }
    };
}
