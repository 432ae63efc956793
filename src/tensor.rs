use crate::{num::DataType, shape::Shape};

/// Marker for backend-assigned tensor identities.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorId;

/// An opaque handle to backend-owned tensor storage.
///
/// A descriptor carries shape and element-type metadata plus the identity its
/// backend assigned at allocation time. Cloning a descriptor clones the
/// handle, never the storage; whoever allocated the storage must eventually
/// request its disposal, exactly once, through that identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorDescriptor {
    shape: Shape,
    r#type: DataType,
    id: uid::Id<TensorId>,
}

impl TensorDescriptor {
    /// Mints a descriptor with a fresh identity. Called by a backend when it
    /// allocates storage; the identity is how the storage is later found and
    /// disposed.
    #[inline]
    pub fn new(shape: impl Into<Shape>, r#type: DataType) -> Self {
        let shape = shape.into();
        let id = uid::Id::new();
        Self { shape, r#type, id }
    }

    #[inline]
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    #[inline]
    pub fn data_type(&self) -> DataType {
        self.r#type
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    /// Total element count.
    #[inline]
    pub fn size(&self) -> usize {
        self.shape.size()
    }

    /// Total storage size in bytes.
    #[inline]
    pub fn data_size(&self) -> usize {
        self.shape.size() * self.r#type.size()
    }

    #[inline]
    pub fn id(&self) -> uid::Id<TensorId> {
        self.id
    }
}
