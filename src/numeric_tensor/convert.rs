use super::{element_count, Element, NumericTensor, NumericTensorError};
use crate::dtype::DType;
use crate::graph::ONNXDecodingError;
use crate::onnx;
use half::{bf16, f16};

fn pod_values<T: bytemuck::AnyBitPattern>(data: &[u8]) -> Vec<T> {
    data.chunks_exact(size_of::<T>()).map(bytemuck::pod_read_unaligned::<T>).collect()
}

fn pod_bytes<T: bytemuck::NoUninit + Element>(tensor: &NumericTensor) -> Result<Vec<u8>, NumericTensorError> {
    let values = tensor.to_vec::<T>()?;
    Ok(bytemuck::cast_slice::<T, u8>(&values).to_vec())
}

impl NumericTensor {
    /// Decodes little-endian packed element data, as stored in ONNX `raw_data`.
    pub fn from_raw_data(data: &[u8], dtype: DType, shape: Vec<usize>) -> Result<Self, NumericTensorError> {
        let count = element_count(&shape, dtype)?;
        if dtype == DType::STRING || Some(data.len()) != count.checked_mul(dtype.size()) {
            return Err(NumericTensorError::RawDataLength(data.len(), count, dtype));
        }
        match dtype {
            DType::F64 => Self::from_vec_shape(pod_values::<f64>(data), shape),
            DType::F32 => Self::from_vec_shape(pod_values::<f32>(data), shape),
            DType::BF16 => Self::from_vec_shape(pod_values::<bf16>(data), shape),
            DType::F16 => Self::from_vec_shape(pod_values::<f16>(data), shape),
            DType::U64 => Self::from_vec_shape(pod_values::<u64>(data), shape),
            DType::I64 => Self::from_vec_shape(pod_values::<i64>(data), shape),
            DType::U32 => Self::from_vec_shape(pod_values::<u32>(data), shape),
            DType::I32 => Self::from_vec_shape(pod_values::<i32>(data), shape),
            DType::U16 => Self::from_vec_shape(pod_values::<u16>(data), shape),
            DType::I16 => Self::from_vec_shape(pod_values::<i16>(data), shape),
            DType::U8 => Self::from_vec_shape(data.to_vec(), shape),
            DType::I8 => Self::from_vec_shape(pod_values::<i8>(data), shape),
            DType::BOOL => Self::from_vec_shape(data.iter().map(|x| *x != 0).collect(), shape),
            DType::STRING => Err(NumericTensorError::RawDataLength(data.len(), count, dtype)),
        }
    }

    pub fn to_raw_data(&self) -> Result<Vec<u8>, NumericTensorError> {
        match self.dtype() {
            DType::F64 => pod_bytes::<f64>(self),
            DType::F32 => pod_bytes::<f32>(self),
            DType::BF16 => pod_bytes::<bf16>(self),
            DType::F16 => pod_bytes::<f16>(self),
            DType::U64 => pod_bytes::<u64>(self),
            DType::I64 => pod_bytes::<i64>(self),
            DType::U32 => pod_bytes::<u32>(self),
            DType::I32 => pod_bytes::<i32>(self),
            DType::U16 => pod_bytes::<u16>(self),
            DType::I16 => pod_bytes::<i16>(self),
            DType::U8 => self.to_vec::<u8>(),
            DType::I8 => pod_bytes::<i8>(self),
            DType::BOOL => Ok(self.to_vec::<bool>()?.into_iter().map(u8::from).collect()),
            DType::STRING => Err(NumericTensorError::UnsupportedOperationForDTypes(
                "to_raw_data".to_string(),
                vec![DType::STRING],
            )),
        }
    }

    /// Encodes the tensor as an ONNX `TensorProto`, using `raw_data` for everything but strings.
    pub fn to_tensor_proto(&self, name: &str) -> Result<onnx::TensorProto, NumericTensorError> {
        let mut proto = onnx::TensorProto {
            name: name.to_string(),
            dims: self.shape().iter().map(|d| *d as i64).collect(),
            data_type: onnx::tensor_proto::DataType::from(self.dtype()) as i32,
            ..Default::default()
        };
        if self.dtype() == DType::STRING {
            proto.string_data = self.to_vec::<String>()?.into_iter().map(String::into_bytes).collect();
        } else {
            proto.raw_data = self.to_raw_data()?;
        }
        Ok(proto)
    }
}

impl TryFrom<&onnx::TensorProto> for NumericTensor {
    type Error = ONNXDecodingError;

    fn try_from(tensor: &onnx::TensorProto) -> Result<Self, Self::Error> {
        let dtype = DType::from_onnx_code(tensor.data_type)?;

        let shape = tensor
            .dims
            .iter()
            .map(|x| usize::try_from(*x).map_err(|_| ONNXDecodingError::NegativeDimensionError))
            .collect::<Result<Vec<usize>, _>>()?;
        let count = element_count(&shape, dtype).map_err(NumericTensorError::from)?;

        let out = if !tensor.raw_data.is_empty() {
            NumericTensor::from_raw_data(&tensor.raw_data, dtype, shape)?
        } else if !tensor.float_data.is_empty() {
            match dtype {
                DType::F32 => NumericTensor::from_vec_shape(tensor.float_data.clone(), shape)?,
                _ => Err(ONNXDecodingError::UnsupportedONNX("Unsupported dtype in float_data field!".to_string()))?,
            }
        } else if !tensor.double_data.is_empty() {
            match dtype {
                DType::F64 => NumericTensor::from_vec_shape(tensor.double_data.clone(), shape)?,
                _ => Err(ONNXDecodingError::UnsupportedONNX("Unsupported dtype in double_data field!".to_string()))?,
            }
        } else if !tensor.int32_data.is_empty() {
            let values = &tensor.int32_data;
            match dtype {
                DType::I32 => NumericTensor::from_vec_shape(values.clone(), shape)?,
                DType::U16 => NumericTensor::from_vec_shape(values.iter().map(|x| *x as u16).collect(), shape)?,
                DType::I16 => NumericTensor::from_vec_shape(values.iter().map(|x| *x as i16).collect(), shape)?,
                DType::U8 => NumericTensor::from_vec_shape(values.iter().map(|x| *x as u8).collect(), shape)?,
                DType::I8 => NumericTensor::from_vec_shape(values.iter().map(|x| *x as i8).collect(), shape)?,
                DType::BOOL => NumericTensor::from_vec_shape(values.iter().map(|x| *x != 0).collect(), shape)?,
                // Half precision values travel as their bit patterns.
                DType::F16 => NumericTensor::from_vec_shape(values.iter().map(|x| f16::from_bits(*x as u16)).collect(), shape)?,
                DType::BF16 => NumericTensor::from_vec_shape(values.iter().map(|x| bf16::from_bits(*x as u16)).collect(), shape)?,
                _ => Err(ONNXDecodingError::UnsupportedONNX("Unsupported dtype in int32_data field!".to_string()))?,
            }
        } else if !tensor.int64_data.is_empty() {
            match dtype {
                DType::I64 => NumericTensor::from_vec_shape(tensor.int64_data.clone(), shape)?,
                _ => Err(ONNXDecodingError::UnsupportedONNX("Unsupported dtype in int64_data field!".to_string()))?,
            }
        } else if !tensor.uint64_data.is_empty() {
            match dtype {
                DType::U64 => NumericTensor::from_vec_shape(tensor.uint64_data.clone(), shape)?,
                DType::U32 => NumericTensor::from_vec_shape(tensor.uint64_data.iter().map(|x| *x as u32).collect(), shape)?,
                _ => Err(ONNXDecodingError::UnsupportedONNX("Unsupported dtype in uint64_data field!".to_string()))?,
            }
        } else if !tensor.string_data.is_empty() {
            match dtype {
                DType::STRING => NumericTensor::from_vec_shape(
                    tensor
                        .string_data
                        .iter()
                        .map(|x| String::from_utf8_lossy(x).into_owned())
                        .collect(),
                    shape,
                )?,
                _ => Err(ONNXDecodingError::UnsupportedONNX("Unsupported dtype in string_data field!".to_string()))?,
            }
        } else if count == 0 {
            if dtype == DType::STRING {
                NumericTensor::from_vec_shape(Vec::<String>::new(), shape)?
            } else {
                NumericTensor::from_raw_data(&[], dtype, shape)?
            }
        } else {
            Err(ONNXDecodingError::UnsupportedONNX("No data field!".to_string()))?
        };
        Ok(out)
    }
}
