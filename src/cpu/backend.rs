use std::sync::{Arc, RwLock};

use itertools::Itertools;
use rustc_hash::FxHashMap as HashMap;

use crate::{
    gather::{GatherError, prepare_gather},
    num::{DataType, Scalar, ScalarElem},
    ops::{Backend, OpError},
    shape::{Shape, broadcast},
    tensor::TensorDescriptor,
};

/// Reference CPU execution target for the primitive operator set.
///
/// Buffers live in a table keyed by descriptor identity and stay valid until
/// [`Backend::dispose`] removes them. The table sits behind a lock only so
/// the operators can run behind `&self`; execution itself is synchronous.
#[derive(Debug, Default)]
pub struct CpuBackend {
    buffers: RwLock<HashMap<usize, Arc<[u8]>>>,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live allocations the backend currently holds.
    pub fn live_tensors(&self) -> usize {
        self.buffers.read().expect("failed to lock").len()
    }

    /// Allocates a tensor of `shape` holding `data`.
    pub fn tensor_of<T: Scalar>(
        &self,
        shape: impl Into<Shape>,
        data: &[T],
    ) -> Result<TensorDescriptor, OpError> {
        let shape = shape.into();
        if shape.size() != data.len() {
            let len = data.len();
            return Err(OpError::Data { shape, len });
        }
        let data = bytemuck::cast_slice(data).to_vec();
        Ok(self.insert(shape, T::DATA_TYPE, data))
    }

    /// Reads a tensor's elements back as `T`.
    pub fn read<T: Scalar>(&self, tensor: &TensorDescriptor) -> Result<Vec<T>, OpError> {
        if tensor.data_type() != T::DATA_TYPE {
            let (expected, actual) = (T::DATA_TYPE, tensor.data_type());
            return Err(OpError::DataType { expected, actual });
        }
        let data = self.fetch(tensor)?;
        Ok(bytemuck::cast_slice(&data).to_vec())
    }

    /// Gathers slices of `tensor` addressed by the multi-dimensional index
    /// tuples in `indices`.
    ///
    /// Plans via [`prepare_gather`], then walks the plan's `update_count`
    /// tuples, flattening each through the plan's strides and copying
    /// `slice_size` contiguous elements per tuple. Index coordinates are
    /// bounds-checked against the addressed dimensions.
    pub fn gather(
        &self,
        tensor: &TensorDescriptor,
        indices: &TensorDescriptor,
    ) -> Result<TensorDescriptor, GatherError> {
        let plan = prepare_gather(tensor, indices)?;
        let data = self.fetch(tensor)?;
        let index_values = self.read::<i32>(indices)?;

        let depth = plan.strides.len();
        let block = plan.slice_size * tensor.data_type().size();
        let mut out = Vec::with_capacity(plan.update_count * block);
        for tuple in 0..plan.update_count {
            let coords = &index_values[tuple * depth..(tuple + 1) * depth];
            let mut offset = 0;
            for (axis, (&index, &stride)) in coords.iter().zip_eq(&plan.strides).enumerate() {
                let bound = tensor.shape()[axis];
                if index < 0 || index as usize >= bound {
                    return Err(GatherError::OutOfBounds { index, axis, bound });
                }
                offset += index as usize * stride;
            }
            out.extend_from_slice(&data[offset * block..(offset + 1) * block]);
        }
        Ok(self.insert(plan.result_shape, tensor.data_type(), out))
    }

    fn insert(
        &self,
        shape: impl Into<Shape>,
        r#type: DataType,
        data: Vec<u8>,
    ) -> TensorDescriptor {
        let tensor = TensorDescriptor::new(shape, r#type);
        self.buffers
            .write()
            .expect("failed to lock")
            .insert(tensor.id().get(), data.into());
        tensor
    }

    fn fetch(&self, tensor: &TensorDescriptor) -> Result<Arc<[u8]>, OpError> {
        self.buffers
            .read()
            .expect("failed to lock")
            .get(&tensor.id().get())
            .cloned()
            .ok_or(OpError::Missing(tensor.id().get()))
    }

    /// Reads a tensor's elements as f64, the common arithmetic carrier of the
    /// elementwise kernels. Complex tensors have no scalar lifting.
    fn lift(&self, op: &'static str, tensor: &TensorDescriptor) -> Result<Vec<f64>, OpError> {
        let data = self.fetch(tensor)?;
        let values = match tensor.data_type() {
            DataType::I32 => bytemuck::cast_slice::<_, i32>(&data)
                .iter()
                .map(|&v| v as f64)
                .collect(),
            DataType::F32 => bytemuck::cast_slice::<_, f32>(&data)
                .iter()
                .map(|&v| v as f64)
                .collect(),
            DataType::Bool => data.iter().map(|&v| (v != 0) as u8 as f64).collect(),
            DataType::C64 => return Err(OpError::Unsupported(op, DataType::C64)),
        };
        Ok(values)
    }

    /// Materializes f64 values into a freshly allocated tensor of `r#type`.
    fn store(&self, shape: impl Into<Shape>, r#type: DataType, values: Vec<f64>) -> TensorDescriptor {
        let data = match r#type {
            DataType::I32 => values
                .iter()
                .flat_map(|&v| (v as i32).to_ne_bytes())
                .collect(),
            DataType::F32 => values
                .iter()
                .flat_map(|&v| (v as f32).to_ne_bytes())
                .collect(),
            DataType::Bool => values.iter().map(|&v| (v != 0.0) as u8).collect(),
            DataType::C64 => unreachable!("complex values are never materialized here"),
        };
        self.insert(shape, r#type, data)
    }

    fn broadcast_shape(a: &TensorDescriptor, b: &TensorDescriptor) -> Result<Shape, OpError> {
        broadcast(a.shape(), b.shape())
            .ok_or_else(|| OpError::Broadcast(a.shape().clone(), b.shape().clone()))
    }
}

/// Strides for reading `shape` as if stretched up to `out`: missing leading
/// axes and size-1 axes read at stride 0 so their single element repeats.
fn broadcast_strides(shape: &Shape, out: &Shape) -> Vec<usize> {
    let strides = shape.strides();
    let offset = out.rank() - shape.rank();
    let mut result = vec![0; out.rank()];
    for k in 0..shape.rank() {
        if shape[k] != 1 {
            result[offset + k] = strides[k];
        }
    }
    result
}

/// Walks the broadcast output space in row-major order, handing `f` the flat
/// source offsets of both operands for every output element.
fn for_each_broadcast_pair(
    out: &Shape,
    a: &Shape,
    b: &Shape,
    mut f: impl FnMut(usize, usize),
) {
    let a_strides = broadcast_strides(a, out);
    let b_strides = broadcast_strides(b, out);
    let rank = out.rank();
    let mut index = vec![0; rank];
    for _ in 0..out.size() {
        let a_offset = index.iter().zip_eq(&a_strides).map(|(i, s)| i * s).sum();
        let b_offset = index.iter().zip_eq(&b_strides).map(|(i, s)| i * s).sum();
        f(a_offset, b_offset);
        for k in (0..rank).rev() {
            index[k] += 1;
            if index[k] < out[k] {
                break;
            }
            index[k] = 0;
        }
    }
}

/// Common data type two operands promote to (`Bool` < `I32` < `F32`).
fn promote(op: &'static str, a: DataType, b: DataType) -> Result<DataType, OpError> {
    match (a, b) {
        (DataType::C64, _) | (_, DataType::C64) => Err(OpError::Unsupported(op, DataType::C64)),
        (DataType::F32, _) | (_, DataType::F32) => Ok(DataType::F32),
        (DataType::I32, _) | (_, DataType::I32) => Ok(DataType::I32),
        (DataType::Bool, DataType::Bool) => Ok(DataType::Bool),
    }
}

impl Backend for CpuBackend {
    fn scalar(&self, value: ScalarElem) -> TensorDescriptor {
        let data = match value {
            ScalarElem::I32(v) => v.to_ne_bytes().to_vec(),
            ScalarElem::F32(v) => v.to_ne_bytes().to_vec(),
            ScalarElem::Bool(v) => vec![v as u8],
        };
        self.insert(Shape::default(), value.data_type(), data)
    }

    fn equal(
        &self,
        a: &TensorDescriptor,
        b: &TensorDescriptor,
    ) -> Result<TensorDescriptor, OpError> {
        promote("equal", a.data_type(), b.data_type())?;
        let shape = Self::broadcast_shape(a, b)?;
        let lhs = self.lift("equal", a)?;
        let rhs = self.lift("equal", b)?;
        let mut data = Vec::with_capacity(shape.size());
        for_each_broadcast_pair(&shape, a.shape(), b.shape(), |i, j| {
            data.push((lhs[i] == rhs[j]) as u8);
        });
        Ok(self.insert(shape, DataType::Bool, data))
    }

    fn cast(&self, x: &TensorDescriptor, r#type: DataType) -> Result<TensorDescriptor, OpError> {
        if r#type.is_complex() {
            return Err(OpError::Unsupported("cast", r#type));
        }
        let values = self.lift("cast", x)?;
        Ok(self.store(x.shape().clone(), r#type, values))
    }

    fn multiply(
        &self,
        a: &TensorDescriptor,
        b: &TensorDescriptor,
    ) -> Result<TensorDescriptor, OpError> {
        let r#type = promote("multiply", a.data_type(), b.data_type())?;
        let shape = Self::broadcast_shape(a, b)?;
        let lhs = self.lift("multiply", a)?;
        let rhs = self.lift("multiply", b)?;
        let mut values = Vec::with_capacity(shape.size());
        for_each_broadcast_pair(&shape, a.shape(), b.shape(), |i, j| {
            values.push(lhs[i] * rhs[j]);
        });
        Ok(self.store(shape, r#type, values))
    }

    fn expand_dims(
        &self,
        input: &TensorDescriptor,
        axis: usize,
    ) -> Result<TensorDescriptor, OpError> {
        if axis > input.rank() {
            let rank = input.rank();
            return Err(OpError::Axis { axis, rank });
        }
        let data = self.fetch(input)?;
        let mut shape = input.shape().to_vec();
        shape.insert(axis, 1);
        Ok(self.insert(shape, input.data_type(), data.to_vec()))
    }

    fn sum(
        &self,
        x: &TensorDescriptor,
        axis: usize,
        keep_dims: bool,
    ) -> Result<TensorDescriptor, OpError> {
        if axis >= x.rank() {
            let rank = x.rank();
            return Err(OpError::Axis { axis, rank });
        }
        // Integer and boolean inputs reduce into I32, floats stay F32.
        let r#type = match x.data_type() {
            DataType::C64 => return Err(OpError::Unsupported("sum", DataType::C64)),
            DataType::Bool | DataType::I32 => DataType::I32,
            DataType::F32 => DataType::F32,
        };
        let values = self.lift("sum", x)?;

        let shape = x.shape();
        let outer: usize = shape[..axis].iter().product();
        let axis_len = shape[axis];
        let inner: usize = shape[axis + 1..].iter().product();

        let mut acc = vec![0.0; outer * inner];
        for o in 0..outer {
            for k in 0..axis_len {
                for i in 0..inner {
                    acc[o * inner + i] += values[(o * axis_len + k) * inner + i];
                }
            }
        }

        let mut out_shape = shape.to_vec();
        if keep_dims {
            out_shape[axis] = 1;
        } else {
            out_shape.remove(axis);
        }
        Ok(self.store(out_shape, r#type, acc))
    }

    fn pack(
        &self,
        inputs: &[TensorDescriptor],
        axis: usize,
    ) -> Result<TensorDescriptor, OpError> {
        let Some(first) = inputs.first() else {
            return Err(OpError::EmptyPack);
        };
        if axis > first.rank() {
            let rank = first.rank();
            return Err(OpError::Axis { axis, rank });
        }
        for input in inputs {
            if input.shape() != first.shape() {
                let (expected, actual) = (first.shape().clone(), input.shape().clone());
                return Err(OpError::PackShape { expected, actual });
            }
            if input.data_type() != first.data_type() {
                let (expected, actual) = (first.data_type(), input.data_type());
                return Err(OpError::DataType { expected, actual });
            }
        }

        let buffers = inputs
            .iter()
            .map(|input| self.fetch(input))
            .collect::<Result<Vec<_>, _>>()?;

        // Interleave the inputs block by block: everything inward of `axis`
        // is one contiguous run of bytes per input.
        let elem = first.data_type().size();
        let outer: usize = first.shape()[..axis].iter().product();
        let block = first.shape()[axis..].iter().product::<usize>() * elem;
        let mut data = Vec::with_capacity(outer * block * inputs.len());
        for o in 0..outer {
            for buffer in &buffers {
                data.extend_from_slice(&buffer[o * block..(o + 1) * block]);
            }
        }

        let mut shape = first.shape().to_vec();
        shape.insert(axis, inputs.len());
        Ok(self.insert(shape, first.data_type(), data))
    }

    fn dispose(&self, tensor: TensorDescriptor) {
        let removed = self
            .buffers
            .write()
            .expect("failed to lock")
            .remove(&tensor.id().get());
        if removed.is_none() {
            log::error!("no storage to dispose for tensor {}", tensor.id().get());
        }
    }
}
