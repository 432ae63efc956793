use derive_more::{Deref, Display, From, Into};
use itertools::Itertools;

/// Dimension sizes of a tensor, outermost first. Rank 0 is a scalar.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Deref, From, Into, Display)]
#[display("[{}]", _0.iter().format(", "))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Shape(Vec<usize>);

impl From<&[usize]> for Shape {
    #[inline]
    fn from(value: &[usize]) -> Self {
        Self(value.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    #[inline]
    fn from(value: [usize; N]) -> Self {
        Self(value.to_vec())
    }
}

impl Shape {
    #[inline]
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Total element count; the empty product is 1, so rank 0 has size 1.
    #[inline]
    pub fn size(&self) -> usize {
        self.0.iter().product()
    }

    /// Row-major strides, one per axis; entry `k` counts the elements skipped
    /// per unit step along axis `k`, with the innermost axis at stride 1.
    pub fn strides(&self) -> Vec<usize> {
        let rank = self.0.len();
        let mut strides = vec![1; rank];
        for k in (0..rank.saturating_sub(1)).rev() {
            strides[k] = strides[k + 1] * self.0[k + 1];
        }
        strides
    }
}

/// Infers the shape produced by broadcasting `a` against `b`: axes align from
/// the innermost end, and a size-1 axis stretches to match its counterpart.
/// Returns `None` when some axis pair is neither equal nor stretchable.
pub fn broadcast(a: &Shape, b: &Shape) -> Option<Shape> {
    let rank = a.rank().max(b.rank());
    let mut out = vec![0; rank];
    for k in 0..rank {
        let x = if k < a.rank() { a[a.rank() - 1 - k] } else { 1 };
        let y = if k < b.rank() { b[b.rank() - 1 - k] } else { 1 };
        out[rank - 1 - k] = match (x, y) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => return None,
        };
    }
    Some(Shape(out))
}

#[cfg(test)]
mod tests {
    use super::{Shape, broadcast};

    #[test]
    fn test_size() {
        assert_eq!(Shape::from([2, 3, 4]).size(), 24);
        assert_eq!(Shape::from([2, 0, 4]).size(), 0);
        assert_eq!(Shape::default().size(), 1);
    }

    #[test]
    fn test_strides() {
        assert_eq!(Shape::from([2, 3, 4]).strides(), vec![12, 4, 1]);
        assert_eq!(Shape::from([4, 4]).strides(), vec![4, 1]);
        assert_eq!(Shape::from([7]).strides(), vec![1]);
        assert!(Shape::default().strides().is_empty());
    }

    #[test]
    fn test_broadcast() {
        let out = broadcast(&[2, 1, 4].into(), &[3, 1].into());
        assert_eq!(out, Some([2, 3, 4].into()));

        let out = broadcast(&Shape::default(), &[3, 2].into());
        assert_eq!(out, Some([3, 2].into()));

        let out = broadcast(&[5].into(), &[5].into());
        assert_eq!(out, Some([5].into()));

        assert_eq!(broadcast(&[2, 3].into(), &[4].into()), None);
        assert_eq!(broadcast(&[2].into(), &[3].into()), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Shape::from([2, 3]).to_string(), "[2, 3]");
        assert_eq!(Shape::default().to_string(), "[]");
    }
}
