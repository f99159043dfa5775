//! Execution core for ONNX computation graphs: graph IR and protobuf intake, shape and type
//! inference, a versioned operator registry with a built-in CPU kernel set, liveness-driven
//! buffer management and a scheduler that recurses into control-flow bodies.

#[macro_use]
mod macros;

pub mod buffer;
pub mod dtype;
pub mod executor;
pub mod graph;
pub mod inference;
pub mod kernels;
pub mod numeric_tensor;
pub mod onnx;
pub mod plan;
pub mod registry;
pub mod types;
pub mod value;

pub use buffer::{AllocationError, BufferManager, BufferStats};
pub use dtype::DType;
pub use executor::{
    CancellationToken, ExecutionError, ExecutionObserver, Executor, ExecutorConfig, GraphOutputs, KernelContext,
};
pub use graph::{Graph, GraphBuilder};
pub use numeric_tensor::NumericTensor;
pub use registry::{OperatorRegistry, VersionRange};
pub use types::{Dimension, TensorType, ValueType};
pub use value::{Sequence, Value};
