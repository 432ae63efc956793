use thiserror::Error;

use crate::{num::DataType, ops::OpError, shape::Shape, tensor::TensorDescriptor};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatherError {
    #[error("gather expects the {subject} to be rank 1 or higher, but the rank was {rank}")]
    RankTooLow { subject: &'static str, rank: usize },
    #[error("gather expects indices of type I32, but the type was {0}")]
    InvalidDataType(DataType),
    #[error("index innermost dimension length must be <= tensor rank; saw: {depth} vs. {rank}")]
    IndexDepthExceedsRank { depth: usize, rank: usize },
    #[error("requested gather from an empty tensor of shape {0}")]
    EmptyInput(Shape),
    #[error("index {index} is out of bounds for axis {axis} of size {bound}")]
    OutOfBounds { index: i32, axis: usize, bound: usize },
    #[error(transparent)]
    Op(#[from] OpError),
}

/// Shape metadata an executor needs to run one gather-by-multi-index.
///
/// The executor walks `update_count` index tuples of `strides.len()`
/// coordinates each, flattens every tuple into a slice-granular offset via
/// `strides`, and copies `slice_size` contiguous elements per tuple into a
/// `result_shape`-shaped output.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GatherPlan {
    /// `indices.shape[..last]` followed by the uncovered trailing dimensions
    /// of the data tensor.
    pub result_shape: Shape,
    /// Number of index tuples, the product of all index dimensions but the
    /// last.
    pub update_count: usize,
    /// Contiguous elements copied per index tuple.
    pub slice_size: usize,
    /// Slice-granular row-major strides, one per tuple coordinate.
    pub strides: Vec<usize>,
}

/// Validates a gather's operands and derives its [`GatherPlan`].
///
/// Pure shape arithmetic: nothing is allocated and no element data is read,
/// so a failed validation needs no cleanup. Checks run in a fixed order and
/// the first violation wins.
pub fn prepare_gather(
    tensor: &TensorDescriptor,
    indices: &TensorDescriptor,
) -> Result<GatherPlan, GatherError> {
    let tensor_rank = tensor.rank();
    let indices_rank = indices.rank();
    if tensor_rank < 1 {
        let (subject, rank) = ("input", tensor_rank);
        return Err(GatherError::RankTooLow { subject, rank });
    }
    if indices_rank < 1 {
        let (subject, rank) = ("indices", indices_rank);
        return Err(GatherError::RankTooLow { subject, rank });
    }
    if indices.data_type() != DataType::I32 {
        return Err(GatherError::InvalidDataType(indices.data_type()));
    }
    let depth = indices.shape()[indices_rank - 1];
    if depth > tensor_rank {
        let rank = tensor_rank;
        return Err(GatherError::IndexDepthExceedsRank { depth, rank });
    }
    if tensor.size() == 0 {
        return Err(GatherError::EmptyInput(tensor.shape().clone()));
    }

    let update_count = indices.shape()[..indices_rank - 1].iter().product();
    let slice_size = tensor.shape()[depth..].iter().product::<usize>();

    let mut result_shape = indices.shape()[..indices_rank - 1].to_vec();
    result_shape.extend_from_slice(&tensor.shape()[depth..]);

    // Per-slice strides cover only the dimensions the index tuples address;
    // the generic stride vector's trailing entries are discarded.
    let strides = tensor
        .shape()
        .strides()
        .into_iter()
        .map(|stride| stride / slice_size)
        .take(depth)
        .collect();

    Ok(GatherPlan {
        result_shape: result_shape.into(),
        update_count,
        slice_size,
        strides,
    })
}
