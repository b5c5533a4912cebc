//! Flattened-index helpers for walking `d`-dimensional tensors whose
//! dimensionality is only known at runtime.
//!
//! The decoder, the encoder's control-point copy step, and the adaptive
//! error scan all need the same two primitives: convert a multi-index to a
//! flat offset into a row-major buffer (`ravel_multi_index`) and the inverse
//! (`unravel_index`), plus a way to iterate every multi-index in a shape
//! without allocating per step. These mirror the const-generic versions used
//! elsewhere for fixed-dimension grids, generalized to `Vec<usize>` shapes
//! since a model's domain dimension is determined by its input data.

/// Converts a `multi_index` into a flat offset for a row-major array of the
/// given `shape`. The first axis is the slowest-varying (outermost).
#[must_use]
pub fn ravel_multi_index(multi_index: &[usize], shape: &[usize]) -> usize {
    debug_assert_eq!(multi_index.len(), shape.len());

    multi_index
        .iter()
        .zip(shape)
        .fold(0, |acc, (i, d)| acc * d + i)
}

/// Converts a flat `index` into a multi-index for a row-major array of the
/// given `shape`.
#[must_use]
pub fn unravel_index(mut index: usize, shape: &[usize]) -> Vec<usize> {
    debug_assert!(shape.iter().product::<usize>() == 0 || index < shape.iter().product());

    let mut indices = vec![0; shape.len()];
    for (i, d) in indices.iter_mut().zip(shape).rev() {
        *i = index % d;
        index /= d;
    }
    indices
}

/// Row-major strides for an array of the given `shape`, such that
/// `ravel_multi_index` is equivalent to `multi_index.iter().zip(&strides).map(|(i, s)| i *
/// s).sum()`.
#[must_use]
pub fn strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

/// Iterator over every multi-index of a `d`-dimensional shape in row-major
/// order, without allocating a fresh `Vec` per axis (only the returned
/// index buffer is reused).
pub struct MultiIndexIter<'a> {
    shape: &'a [usize],
    current: Vec<usize>,
    done: bool,
}

impl<'a> MultiIndexIter<'a> {
    /// Creates an iterator over all multi-indices of `shape`. An empty
    /// shape, or a shape containing a zero extent, yields no elements.
    #[must_use]
    pub fn new(shape: &'a [usize]) -> Self {
        let done = shape.is_empty() || shape.iter().any(|&d| d == 0);
        Self {
            shape,
            current: vec![0; shape.len()],
            done,
        }
    }
}

impl Iterator for MultiIndexIter<'_> {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let result = self.current.clone();

        for axis in (0..self.shape.len()).rev() {
            self.current[axis] += 1;
            if self.current[axis] < self.shape[axis] {
                return Some(result);
            }
            self.current[axis] = 0;
        }
        self.done = true;

        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ravel_and_unravel_roundtrip() {
        let shape = [3, 2, 4];
        for flat in 0..shape.iter().product() {
            let multi = unravel_index(flat, &shape);
            assert_eq!(ravel_multi_index(&multi, &shape), flat);
        }
    }

    #[test]
    fn strides_match_ravel() {
        let shape = vec![3, 2, 4];
        let s = strides(&shape);
        for flat in 0..shape.iter().product() {
            let multi = unravel_index(flat, &shape);
            let via_strides: usize = multi.iter().zip(&s).map(|(i, s)| i * s).sum();
            assert_eq!(via_strides, flat);
        }
    }

    #[test]
    fn multi_index_iter_covers_all() {
        let shape = [2, 3];
        let all: Vec<_> = MultiIndexIter::new(&shape).collect();
        assert_eq!(all.len(), 6);
        assert_eq!(all[0], vec![0, 0]);
        assert_eq!(all[5], vec![1, 2]);
    }

    #[test]
    fn multi_index_iter_empty_on_zero_extent() {
        let shape = [3, 0, 2];
        assert_eq!(MultiIndexIter::new(&shape).count(), 0);
    }
}
