use crate::{ops::Backend, tensor::TensorDescriptor};

/// Owns the intermediate tensors allocated while composing an operation.
///
/// Descriptors registered with [`track`](Self::track) are disposed through
/// the backend when the arena drops. Since the drop runs on every exit path
/// of the composing function, intermediates are released exactly once whether
/// the composition succeeds or bails out halfway with an error. The final
/// result of a composition must not be tracked; it is the one allocation
/// meant to outlive the call.
pub struct Arena<'a> {
    backend: &'a dyn Backend,
    tracked: Vec<TensorDescriptor>,
}

impl<'a> Arena<'a> {
    #[inline]
    pub fn new(backend: &'a dyn Backend) -> Self {
        let tracked = Vec::new();
        Self { backend, tracked }
    }

    /// Registers `tensor` for disposal and returns a handle to keep using it.
    /// Each descriptor may be tracked at most once.
    #[inline]
    pub fn track(&mut self, tensor: TensorDescriptor) -> TensorDescriptor {
        let handle = tensor.clone();
        self.tracked.push(tensor);
        handle
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }
}

impl Drop for Arena<'_> {
    fn drop(&mut self) {
        for tensor in self.tracked.drain(..) {
            self.backend.dispose(tensor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Arena;
    use crate::{
        cpu::CpuBackend,
        num::ScalarElem,
        ops::{Backend, OpError},
        tensor::TensorDescriptor,
    };

    #[test]
    fn test_drop_releases_tracked() {
        let cpu = CpuBackend::new();
        {
            let mut arena = Arena::new(&cpu);
            arena.track(cpu.scalar(ScalarElem::I32(1)));
            arena.track(cpu.scalar(ScalarElem::F32(2.0)));
            assert_eq!(arena.len(), 2);
            assert_eq!(cpu.live_tensors(), 2);
        }
        assert_eq!(cpu.live_tensors(), 0);
    }

    #[test]
    fn test_untracked_survives() {
        let cpu = CpuBackend::new();
        let kept = {
            let mut arena = Arena::new(&cpu);
            arena.track(cpu.scalar(ScalarElem::I32(0)));
            cpu.scalar(ScalarElem::I32(7))
        };
        assert_eq!(cpu.live_tensors(), 1);
        assert_eq!(cpu.read::<i32>(&kept).unwrap(), vec![7]);
    }

    #[test]
    fn test_drop_runs_on_error_path() {
        fn bail(cpu: &CpuBackend) -> Result<TensorDescriptor, OpError> {
            let mut arena = Arena::new(cpu);
            arena.track(cpu.scalar(ScalarElem::I32(3)));
            Err(OpError::EmptyPack)
        }

        let cpu = CpuBackend::new();
        assert!(bail(&cpu).is_err());
        assert_eq!(cpu.live_tensors(), 0);
    }
}
