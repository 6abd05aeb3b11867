use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{Error, Result};

pub mod mnist;

/// Samples stored row-wise: `data` holds one feature vector per row and
/// `target` the matching class label
#[derive(Debug, Clone)]
pub struct Dataset {
    pub data: Array2<f64>,
    pub target: Array1<usize>,
}

impl Dataset {
    pub fn new(data: Array2<f64>, target: Array1<usize>) -> Result<Dataset> {
        if data.nrows() != target.len() {
            return Err(Error::Shape(format!(
                "{} feature rows but {} labels",
                data.nrows(),
                target.len()
            )));
        }

        Ok(Dataset { data, target })
    }

    pub fn len(&self) -> usize {
        self.target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.target.is_empty()
    }

    pub fn num_features(&self) -> usize {
        self.data.ncols()
    }

    /// The feature vector and label at `index`, or None past the end
    pub fn get(&self, index: usize) -> Option<(ArrayView1<'_, f64>, usize)> {
        if index >= self.len() {
            return None;
        }

        Some((self.data.row(index), self.target[index]))
    }

    /// Number of batches `batches` yields for this batch size
    pub fn num_batches(&self, batch_size: usize) -> usize {
        (self.len() + batch_size - 1) / batch_size
    }

    /// Contiguous batches in dataset order. The last one is shorter when
    /// the batch size does not divide the sample count.
    ///
    /// Panics if `batch_size` is zero.
    pub fn batches(
        &self,
        batch_size: usize,
    ) -> impl Iterator<Item = (ArrayView2<'_, f64>, ArrayView1<'_, usize>)> + '_ {
        self.data
            .axis_chunks_iter(Axis(0), batch_size)
            .zip(self.target.axis_chunks_iter(Axis(0), batch_size))
    }
}
