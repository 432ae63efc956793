use thiserror::Error;

use crate::{
    num::{DataType, ScalarElem},
    shape::Shape,
    tensor::TensorDescriptor,
};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OpError {
    #[error("shapes {0} and {1} are not broadcast-compatible")]
    Broadcast(Shape, Shape),
    #[error("expected data type {expected}, got {actual}")]
    DataType { expected: DataType, actual: DataType },
    #[error("{0} does not support data type {1}")]
    Unsupported(&'static str, DataType),
    #[error("axis {axis} is out of bounds for rank {rank}")]
    Axis { axis: usize, rank: usize },
    #[error("pack expects at least one input")]
    EmptyPack,
    #[error("pack inputs must all have shape {expected}, got {actual}")]
    PackShape { expected: Shape, actual: Shape },
    #[error("shape {shape} does not match data of {len} elements")]
    Data { shape: Shape, len: usize },
    #[error("no storage for tensor {0}")]
    Missing(usize),
}

/// The primitive operator set a composite kernel is written against.
///
/// Every operation allocates backing storage for its result and returns a
/// fresh descriptor; the caller owns that descriptor and must eventually hand
/// it back to [`dispose`](Backend::dispose). Binary operations follow the
/// standard right-aligned broadcasting rules (see [`crate::shape::broadcast`]).
///
/// All operations complete synchronously before returning.
pub trait Backend {
    /// Allocates a rank-0 tensor holding `value`.
    fn scalar(&self, value: ScalarElem) -> TensorDescriptor;

    /// Elementwise equality with broadcasting; the output is of type
    /// [`DataType::Bool`].
    fn equal(
        &self,
        a: &TensorDescriptor,
        b: &TensorDescriptor,
    ) -> Result<TensorDescriptor, OpError>;

    /// Elementwise conversion of `x` into `r#type`.
    fn cast(&self, x: &TensorDescriptor, r#type: DataType) -> Result<TensorDescriptor, OpError>;

    /// Elementwise product with broadcasting; operands promote to a common
    /// data type (`Bool` < `I32` < `F32`).
    fn multiply(
        &self,
        a: &TensorDescriptor,
        b: &TensorDescriptor,
    ) -> Result<TensorDescriptor, OpError>;

    /// Inserts a size-1 axis at position `axis`.
    fn expand_dims(
        &self,
        input: &TensorDescriptor,
        axis: usize,
    ) -> Result<TensorDescriptor, OpError>;

    /// Reduces `x` along `axis` by summation. With `keep_dims` the reduced
    /// axis stays in the output at size 1; otherwise it is removed.
    fn sum(
        &self,
        x: &TensorDescriptor,
        axis: usize,
        keep_dims: bool,
    ) -> Result<TensorDescriptor, OpError>;

    /// Stacks equally shaped tensors along a new axis at position `axis`,
    /// preserving input order.
    fn pack(&self, inputs: &[TensorDescriptor], axis: usize)
    -> Result<TensorDescriptor, OpError>;

    /// Releases the storage behind `tensor`. At most once per descriptor.
    fn dispose(&self, tensor: TensorDescriptor);
}
