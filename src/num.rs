use bytemuck::Pod;
use derive_more::{Display, From};

/// Element types a tensor descriptor can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataType {
    I32,
    F32,
    Bool,
    C64,
}

impl DataType {
    /// Returns the storage size of one element in bytes.
    pub const fn size(self) -> usize {
        match self {
            DataType::I32 => 4,
            DataType::F32 => 4,
            DataType::Bool => 1,
            DataType::C64 => 8,
        }
    }

    #[inline]
    pub const fn is_complex(self) -> bool {
        matches!(self, DataType::C64)
    }

    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(self, DataType::F32)
    }
}

/// A literal value tagged with its data type, for the backend's rank-0
/// tensor constructor.
#[derive(Debug, Clone, Copy, PartialEq, Display, From)]
pub enum ScalarElem {
    #[display("{_0}")]
    I32(i32),
    #[display("{_0}")]
    F32(f32),
    #[display("{_0}")]
    Bool(bool),
}

impl ScalarElem {
    #[inline]
    pub const fn data_type(self) -> DataType {
        match self {
            ScalarElem::I32(_) => DataType::I32,
            ScalarElem::F32(_) => DataType::F32,
            ScalarElem::Bool(_) => DataType::Bool,
        }
    }
}

/// Rust element types that back a [`DataType`] in buffer storage.
pub trait Scalar: Pod + Send + Sync {
    const DATA_TYPE: DataType;
}

impl Scalar for i32 {
    const DATA_TYPE: DataType = DataType::I32;
}

impl Scalar for f32 {
    const DATA_TYPE: DataType = DataType::F32;
}

/// Bool tensors store one `0`/`1` byte per element.
impl Scalar for u8 {
    const DATA_TYPE: DataType = DataType::Bool;
}

/// Complex tensors store interleaved `[re, im]` pairs.
impl Scalar for [f32; 2] {
    const DATA_TYPE: DataType = DataType::C64;
}
