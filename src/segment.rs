use thiserror::Error;

use crate::{
    arena::Arena,
    num::{DataType, ScalarElem},
    ops::{Backend, OpError},
    tensor::TensorDescriptor,
};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SegmentError {
    #[error("segment sum does not support complex data, got {0}")]
    UnsupportedDataType(DataType),
    #[error("segment id rank {ids} exceeds data rank {data}")]
    RankMismatch { ids: usize, data: usize },
    #[error(transparent)]
    Op(#[from] OpError),
}

/// Sums the leading-axis slices of `x` grouped by `segment_ids` into
/// `num_segments` output rows.
///
/// `segment_ids` labels each leading-axis slice of `x` with an int32 segment
/// id; ids need not be sorted or contiguous. Row `i` of the result
/// accumulates, in f32, every slice labeled `i`, and ids that match nothing
/// produce all-zero rows. The result has shape `[num_segments, x.shape[1..]]`.
///
/// Composed entirely from the backend's primitives: the ids are aligned to
/// `x`'s rank with trailing size-1 axes, then each segment is extracted by an
/// equality mask against its id, multiplied into `x`, reduced along axis 0,
/// and the per-segment rows are stacked in segment order. Every tensor
/// allocated along the way is disposed before this returns, on the success
/// and failure paths alike; the packed result is the only allocation that
/// survives the call.
pub fn unsorted_segment_sum(
    backend: &dyn Backend,
    x: &TensorDescriptor,
    segment_ids: &TensorDescriptor,
    num_segments: usize,
) -> Result<TensorDescriptor, SegmentError> {
    if x.data_type().is_complex() {
        return Err(SegmentError::UnsupportedDataType(x.data_type()));
    }
    if segment_ids.rank() > x.rank() {
        let (ids, data) = (segment_ids.rank(), x.rank());
        return Err(SegmentError::RankMismatch { ids, data });
    }

    let mut arena = Arena::new(backend);

    // Align the ids with x by appending size-1 axes, so that each segment's
    // mask broadcasts over x's trailing dimensions.
    let num_iters = x.rank() - segment_ids.rank();
    let mut ids = segment_ids.clone();
    for i in 0..num_iters {
        ids = arena.track(backend.expand_dims(&ids, i + 1)?);
    }

    // Strictly increasing segment order: the pack below relies on position,
    // not on any tag, to assign rows to segments.
    let mut rows = Vec::with_capacity(num_segments);
    for i in 0..num_segments {
        let scalar = arena.track(backend.scalar(ScalarElem::I32(i as i32)));
        let mask = arena.track(backend.equal(&scalar, &ids)?);
        let mask = arena.track(backend.cast(&mask, DataType::F32)?);
        let product = arena.track(backend.multiply(&mask, x)?);
        let row = arena.track(backend.sum(&product, 0, false)?);
        rows.push(row);
    }

    let result = backend.pack(&rows, 0)?;
    log::trace!(
        "packed {num_segments} segment rows, releasing {} intermediates",
        arena.len()
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::{SegmentError, unsorted_segment_sum};
    use crate::{
        cpu::CpuBackend,
        num::{DataType, ScalarElem},
        ops::{Backend, OpError},
        tensor::TensorDescriptor,
    };

    fn segment_sum_f32(
        cpu: &CpuBackend,
        x_shape: &[usize],
        x: &[f32],
        ids: &[i32],
        num_segments: usize,
    ) -> (TensorDescriptor, Vec<f32>) {
        let x = cpu.tensor_of(x_shape, x).unwrap();
        let ids = cpu.tensor_of([ids.len()], ids).unwrap();
        let result = unsorted_segment_sum(cpu, &x, &ids, num_segments).unwrap();
        let values = cpu.read::<f32>(&result).unwrap();
        (result, values)
    }

    #[test]
    fn test_basic_grouping() {
        let cpu = CpuBackend::new();
        let (result, values) = segment_sum_f32(
            &cpu,
            &[3, 2],
            &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            &[0, 1, 0],
            2,
        );
        assert_eq!(**result.shape(), vec![2, 2]);
        assert_eq!(values, vec![6.0, 8.0, 3.0, 4.0]);
    }

    #[test]
    fn test_empty_segments_are_zero() {
        let cpu = CpuBackend::new();
        let (result, values) =
            segment_sum_f32(&cpu, &[2, 2], &[1.0, 2.0, 3.0, 4.0], &[0, 0], 3);
        assert_eq!(**result.shape(), vec![3, 2]);
        assert_eq!(values, vec![4.0, 6.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_rank_one_data() {
        let cpu = CpuBackend::new();
        let (result, values) = segment_sum_f32(&cpu, &[3], &[1.0, 2.0, 3.0], &[0, 1, 0], 2);
        assert_eq!(**result.shape(), vec![2]);
        assert_eq!(values, vec![4.0, 2.0]);
    }

    #[test]
    fn test_rank_three_data() {
        let cpu = CpuBackend::new();
        let x: Vec<f32> = (1..=8).map(|v| v as f32).collect();
        let (result, values) = segment_sum_f32(&cpu, &[2, 2, 2], &x, &[1, 0], 2);
        assert_eq!(**result.shape(), vec![2, 2, 2]);
        assert_eq!(values, vec![5.0, 6.0, 7.0, 8.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_int_data_accumulates_as_f32() {
        let cpu = CpuBackend::new();
        let x = cpu.tensor_of([3], &[1i32, 2, 3]).unwrap();
        let ids = cpu.tensor_of([3], &[1i32, 1, 0]).unwrap();
        let result = unsorted_segment_sum(&cpu, &x, &ids, 2).unwrap();
        assert_eq!(result.data_type(), DataType::F32);
        assert_eq!(cpu.read::<f32>(&result).unwrap(), vec![3.0, 3.0]);
    }

    #[test]
    fn test_total_is_conserved() {
        let cpu = CpuBackend::new();
        let x: Vec<f32> = (0..24).map(|v| v as f32 * 0.5).collect();
        let ids = [3, 0, 3, 1, 2, 0];
        let (_, values) = segment_sum_f32(&cpu, &[6, 4], &x, &ids, 4);
        let total: f32 = values.iter().sum();
        let expected: f32 = x.iter().sum();
        assert!((total - expected).abs() < 1e-4);
    }

    #[test]
    fn test_permutation_invariance() {
        let cpu = CpuBackend::new();
        let x: Vec<f32> = (0..10).map(|v| v as f32).collect();
        let ids = [0, 2, 1, 0, 2];

        let (_, reference) = segment_sum_f32(&cpu, &[5, 2], &x, &ids, 3);

        let mut order: Vec<usize> = (0..5).collect();
        let mut rng = fastrand::Rng::with_seed(42);
        rng.shuffle(&mut order);

        let permuted_x: Vec<f32> = order
            .iter()
            .flat_map(|&row| x[row * 2..row * 2 + 2].to_vec())
            .collect();
        let permuted_ids: Vec<i32> = order.iter().map(|&row| ids[row]).collect();
        let (_, permuted) = segment_sum_f32(&cpu, &[5, 2], &permuted_x, &permuted_ids, 3);

        for (a, b) in reference.iter().zip(permuted.iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_complex_data_is_rejected() {
        let cpu = CpuBackend::new();
        let x = cpu.tensor_of([2], &[[1.0f32, 0.0], [0.0, 1.0]]).unwrap();
        let ids = cpu.tensor_of([2], &[0i32, 0]).unwrap();
        let err = unsorted_segment_sum(&cpu, &x, &ids, 1).unwrap_err();
        assert_eq!(err, SegmentError::UnsupportedDataType(DataType::C64));
        assert_eq!(cpu.live_tensors(), 2);
    }

    #[test]
    fn test_id_rank_above_data_rank_is_rejected() {
        let cpu = CpuBackend::new();
        let x = cpu.tensor_of([2], &[1.0f32, 2.0]).unwrap();
        let ids = cpu.tensor_of([2, 1], &[0i32, 1]).unwrap();
        let err = unsorted_segment_sum(&cpu, &x, &ids, 2).unwrap_err();
        assert_eq!(err, SegmentError::RankMismatch { ids: 2, data: 1 });
    }

    #[test]
    fn test_zero_segments_surface_pack_error() {
        let cpu = CpuBackend::new();
        let x = cpu.tensor_of([2, 2], &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        let ids = cpu.tensor_of([2], &[0i32, 1]).unwrap();
        let err = unsorted_segment_sum(&cpu, &x, &ids, 0).unwrap_err();
        assert_eq!(err, SegmentError::Op(OpError::EmptyPack));
        assert_eq!(cpu.live_tensors(), 2);
    }

    #[test]
    fn test_only_the_result_survives() {
        let cpu = CpuBackend::new();
        let x = cpu
            .tensor_of([3, 2], &[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0])
            .unwrap();
        let ids = cpu.tensor_of([3], &[0i32, 1, 0]).unwrap();
        assert_eq!(cpu.live_tensors(), 2);

        let result = unsorted_segment_sum(&cpu, &x, &ids, 2).unwrap();
        assert_eq!(cpu.live_tensors(), 3);

        cpu.dispose(result);
        assert_eq!(cpu.live_tensors(), 2);
    }

    /// Forwards to a real backend but fails `multiply` once its countdown
    /// hits zero, to drive the composition down its error path.
    struct FailingBackend<'a> {
        inner: &'a CpuBackend,
        multiplies_left: Cell<usize>,
    }

    impl Backend for FailingBackend<'_> {
        fn scalar(&self, value: ScalarElem) -> TensorDescriptor {
            self.inner.scalar(value)
        }

        fn equal(
            &self,
            a: &TensorDescriptor,
            b: &TensorDescriptor,
        ) -> Result<TensorDescriptor, OpError> {
            self.inner.equal(a, b)
        }

        fn cast(
            &self,
            x: &TensorDescriptor,
            r#type: DataType,
        ) -> Result<TensorDescriptor, OpError> {
            self.inner.cast(x, r#type)
        }

        fn multiply(
            &self,
            a: &TensorDescriptor,
            b: &TensorDescriptor,
        ) -> Result<TensorDescriptor, OpError> {
            match self.multiplies_left.get() {
                0 => Err(OpError::Unsupported("multiply", a.data_type())),
                left => {
                    self.multiplies_left.set(left - 1);
                    self.inner.multiply(a, b)
                }
            }
        }

        fn expand_dims(
            &self,
            input: &TensorDescriptor,
            axis: usize,
        ) -> Result<TensorDescriptor, OpError> {
            self.inner.expand_dims(input, axis)
        }

        fn sum(
            &self,
            x: &TensorDescriptor,
            axis: usize,
            keep_dims: bool,
        ) -> Result<TensorDescriptor, OpError> {
            self.inner.sum(x, axis, keep_dims)
        }

        fn pack(
            &self,
            inputs: &[TensorDescriptor],
            axis: usize,
        ) -> Result<TensorDescriptor, OpError> {
            self.inner.pack(inputs, axis)
        }

        fn dispose(&self, tensor: TensorDescriptor) {
            self.inner.dispose(tensor)
        }
    }

    #[test]
    fn test_mid_loop_failure_releases_intermediates() {
        let cpu = CpuBackend::new();
        let x = cpu
            .tensor_of([3, 2], &[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0])
            .unwrap();
        let ids = cpu.tensor_of([3], &[0i32, 1, 0]).unwrap();
        assert_eq!(cpu.live_tensors(), 2);

        let backend = FailingBackend {
            inner: &cpu,
            multiplies_left: Cell::new(1),
        };
        let err = unsorted_segment_sum(&backend, &x, &ids, 2).unwrap_err();
        assert!(matches!(err, SegmentError::Op(OpError::Unsupported(..))));

        // Everything allocated before the failure is gone; only the caller's
        // inputs remain.
        assert_eq!(cpu.live_tensors(), 2);
    }
}
