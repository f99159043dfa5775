use super::{Attribute, Graph, GraphBuilder, ONNXDecodingError};
use crate::dtype::DType;
use crate::numeric_tensor::NumericTensor;
use crate::onnx;
use crate::onnx::attribute_proto::AttributeType;
use crate::types::{Dimension, TensorType, ValueType};
use log::debug;
use prost::Message;
use std::collections::HashMap;
use std::sync::Arc;

pub(super) fn graph_from_onnx_bytes(onnx_bytes: &[u8]) -> Result<Graph, ONNXDecodingError> {
    let model = onnx::ModelProto::decode(onnx_bytes).map_err(|x| ONNXDecodingError::ProtobufDecodeError(anyhow::Error::from(x)))?;
    graph_from_onnx_model(&model)
}

pub(super) fn graph_from_onnx_model(model: &onnx::ModelProto) -> Result<Graph, ONNXDecodingError> {
    let mut opset_imports = HashMap::new();
    for opset in &model.opset_import {
        opset_imports.insert(super::canonical_domain(&opset.domain).to_string(), opset.version);
    }
    debug!(
        "Decoding ONNX model from \"{}\" (ir_version {}, opsets {:?})",
        model.producer_name, model.ir_version, opset_imports
    );
    let graph = model.graph.as_ref().ok_or(ONNXDecodingError::MissingField("graph"))?;
    decode_graph(graph, &opset_imports)
}

/// Sub-graphs inherit the opset imports of the model.
fn decode_graph(proto: &onnx::GraphProto, opset_imports: &HashMap<String, i64>) -> Result<Graph, ONNXDecodingError> {
    let mut builder = GraphBuilder::new(proto.name.clone());
    for (domain, version) in opset_imports {
        builder.opset(domain, *version);
    }

    for input in &proto.input {
        match decode_value_info(input)? {
            Some(value_type) => builder.input(input.name.clone(), value_type),
            None => builder.untyped_input(input.name.clone()),
        };
    }
    for initializer in &proto.initializer {
        builder.initializer(initializer.name.clone(), NumericTensor::try_from(initializer)?);
    }
    for value_info in &proto.value_info {
        if let Some(value_type) = decode_value_info(value_info)? {
            builder.value_info(value_info.name.clone(), value_type);
        }
    }
    for node in &proto.node {
        let pending = builder.node(
            &node.op_type,
            &node.input.iter().map(String::as_str).collect::<Vec<_>>(),
            &node.output.iter().map(String::as_str).collect::<Vec<_>>(),
        );
        if !node.name.is_empty() {
            pending.name(node.name.clone());
        }
        pending.domain(node.domain.clone());
        for attribute in &node.attribute {
            if !attribute.ref_attr_name.is_empty() {
                return Err(ONNXDecodingError::UnsupportedONNX(format!(
                    "attribute reference \"{}\" outside of a function",
                    attribute.ref_attr_name
                )));
            }
            pending.attr(attribute.name.clone(), decode_attribute(attribute, opset_imports)?);
        }
    }
    for output in &proto.output {
        match decode_value_info(output)? {
            Some(value_type) => builder.typed_output(output.name.clone(), value_type),
            None => builder.output(output.name.clone()),
        };
    }

    builder
        .build()
        .map_err(|e| ONNXDecodingError::GraphConstructionError(proto.name.clone(), e))
}

fn decode_value_info(info: &onnx::ValueInfoProto) -> Result<Option<ValueType>, ONNXDecodingError> {
    info.r#type.as_ref().map(decode_type).transpose()
}

pub(crate) fn decode_type(proto: &onnx::TypeProto) -> Result<ValueType, ONNXDecodingError> {
    let value = proto.value.as_ref().ok_or(ONNXDecodingError::MissingField("type.value"))?;
    Ok(match value {
        onnx::type_proto::Value::TensorType(tensor) => {
            let dtype = if tensor.elem_type == 0 { None } else { Some(DType::from_onnx_code(tensor.elem_type)?) };
            let shape = match &tensor.shape {
                None => None,
                Some(shape) => Some(shape.dim.iter().map(decode_dimension).collect::<Result<Vec<_>, _>>()?),
            };
            ValueType::Tensor(TensorType { dtype, shape })
        }
        onnx::type_proto::Value::SequenceType(sequence) => {
            let elem = sequence.elem_type.as_ref().ok_or(ONNXDecodingError::MissingField("sequence_type.elem_type"))?;
            ValueType::Sequence(Box::new(decode_type(elem)?))
        }
        onnx::type_proto::Value::OptionalType(optional) => {
            let elem = optional.elem_type.as_ref().ok_or(ONNXDecodingError::MissingField("optional_type.elem_type"))?;
            ValueType::Optional(Box::new(decode_type(elem)?))
        }
    })
}

fn decode_dimension(dim: &onnx::tensor_shape_proto::Dimension) -> Result<Dimension, ONNXDecodingError> {
    Ok(match &dim.value {
        Some(onnx::tensor_shape_proto::dimension::Value::DimValue(x)) => {
            Dimension::Known(usize::try_from(*x).map_err(|_| ONNXDecodingError::NegativeDimensionError)?)
        }
        Some(onnx::tensor_shape_proto::dimension::Value::DimParam(x)) if !x.is_empty() => Dimension::Symbolic(x.clone()),
        _ => Dimension::Unknown,
    })
}

fn decode_strings(values: &[Vec<u8>]) -> Vec<String> {
    values.iter().map(|x| String::from_utf8_lossy(x).into_owned()).collect()
}

fn decode_attribute(
    attribute: &onnx::AttributeProto,
    opset_imports: &HashMap<String, i64>,
) -> Result<Attribute, ONNXDecodingError> {
    let unsupported = || ONNXDecodingError::UnsupportedAttributeType(attribute.name.clone(), attribute.r#type);
    let kind = AttributeType::try_from(attribute.r#type).map_err(|_| unsupported())?;
    Ok(match kind {
        AttributeType::Float => Attribute::Float(attribute.f),
        AttributeType::Int => Attribute::Int(attribute.i),
        AttributeType::String => Attribute::String(String::from_utf8_lossy(&attribute.s).into_owned()),
        AttributeType::Tensor => {
            let tensor = attribute.t.as_ref().ok_or(ONNXDecodingError::MissingField("attribute.t"))?;
            Attribute::Tensor(NumericTensor::try_from(tensor)?)
        }
        AttributeType::Graph => {
            let graph = attribute.g.as_ref().ok_or(ONNXDecodingError::MissingField("attribute.g"))?;
            Attribute::Graph(Arc::new(decode_graph(graph, opset_imports)?))
        }
        AttributeType::Floats => Attribute::Floats(attribute.floats.clone()),
        AttributeType::Ints => Attribute::Ints(attribute.ints.clone()),
        AttributeType::Strings => Attribute::Strings(decode_strings(&attribute.strings)),
        AttributeType::Tensors => Attribute::Tensors(
            attribute
                .tensors
                .iter()
                .map(NumericTensor::try_from)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        AttributeType::Graphs => Attribute::Graphs(
            attribute
                .graphs
                .iter()
                .map(|g| decode_graph(g, opset_imports).map(Arc::new))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        AttributeType::Undefined
        | AttributeType::SparseTensor
        | AttributeType::SparseTensors
        | AttributeType::TypeProto
        | AttributeType::TypeProtos => return Err(unsupported()),
    })
}
