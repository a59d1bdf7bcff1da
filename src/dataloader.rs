//! Data loader

use std::collections::HashSet;

use rand::{Rng, SeedableRng, seq::SliceRandom};
use rand_pcg::Pcg64Mcg;
use thiserror::Error;

use crate::tensor::Tensor;

/// Errors for the dataloader
#[derive(Debug, Error)]
pub enum DataLoaderError {
    #[error(
        "All input vectors must have the same dimension. Received different sizes: {input_dims:?}"
    )]
    InputDimensionMismatch { input_dims: HashSet<usize> },
    #[error("Labels must have the same length as the data")]
    LabelLengthMismatch { label_len: usize, data_len: usize },
    #[error("Batch size must be at least 1")]
    ZeroBatchSize,
}

/// One mini-batch: inputs `[batch, features]` paired with class indices `[batch]`
#[derive(Debug, Clone)]
pub struct Batch {
    pub inputs: Tensor,
    pub labels: Tensor,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.labels.numel()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A finite source of batches which restarts on every call, one call per epoch
pub trait BatchSource {
    fn batches(&mut self) -> Box<dyn Iterator<Item = Batch> + '_>;
}

/// Fixed batches served in order, e.g. a pre-batched dataset
impl BatchSource for Vec<Batch> {
    fn batches(&mut self) -> Box<dyn Iterator<Item = Batch> + '_> {
        Box::new(self.iter().cloned())
    }
}

/// Data loader, returns batches of data and labels optionally shuffled
/// Takes inspiration from the PyTorch DataLoader
/// <https://pytorch.org/docs/stable/data.html#torch.utils.data.DataLoader>
///
/// Every batch is built from fresh leaf values, so no graph is shared between steps.
pub struct DataLoader {
    data: Vec<Vec<f32>>,
    labels: Vec<usize>,
    batch_size: usize,
    shuffle: bool,
    drop_last: bool,
    rng: Pcg64Mcg,
}

impl DataLoader {
    pub fn new(
        data: Vec<Vec<f32>>,
        labels: Vec<usize>,
        batch_size: usize,
        shuffle: bool,
    ) -> Result<Self, DataLoaderError> {
        if batch_size == 0 {
            return Err(DataLoaderError::ZeroBatchSize);
        }
        if data.len() != labels.len() {
            return Err(DataLoaderError::LabelLengthMismatch {
                label_len: labels.len(),
                data_len: data.len(),
            });
        }
        let input_dims = data.iter().map(|d| d.len()).collect::<HashSet<_>>();
        if input_dims.len() > 1 {
            return Err(DataLoaderError::InputDimensionMismatch { input_dims });
        }
        Ok(Self {
            data,
            labels,
            batch_size,
            shuffle,
            drop_last: false,
            rng: Pcg64Mcg::seed_from_u64(rand::rng().random()),
        })
    }

    /// Makes the shuffle order reproducible
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Pcg64Mcg::seed_from_u64(seed);
        self
    }

    /// Skips the trailing batch when the dataset size is not a multiple of the batch size
    pub fn with_drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    pub fn n_samples(&self) -> usize {
        self.data.len()
    }

    pub fn n_features(&self) -> usize {
        self.data.first().map_or(0, Vec::len)
    }

    /// Number of batches in one epoch
    pub fn len(&self) -> usize {
        if self.drop_last {
            self.data.len() / self.batch_size
        } else {
            self.data.len().div_ceil(self.batch_size)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Starts a new epoch, reshuffling the sample order if enabled
    pub fn iter(&mut self) -> DataLoaderIterator<'_> {
        let mut indices = (0..self.data.len()).collect::<Vec<_>>();
        if self.shuffle {
            indices.shuffle(&mut self.rng);
        }
        let n_batches = self.len();
        DataLoaderIterator {
            data: &self.data,
            labels: &self.labels,
            batch_size: self.batch_size,
            indices,
            curr_batch: 0,
            n_batches,
        }
    }
}

impl BatchSource for DataLoader {
    fn batches(&mut self) -> Box<dyn Iterator<Item = Batch> + '_> {
        Box::new(self.iter())
    }
}

/// An iterator which returns mini batches of data and labels until the end of the dataset
pub struct DataLoaderIterator<'a> {
    data: &'a [Vec<f32>],
    labels: &'a [usize],
    batch_size: usize,
    // optionally shuffled indices
    indices: Vec<usize>,
    curr_batch: usize,
    n_batches: usize,
}

impl Iterator for DataLoaderIterator<'_> {
    type Item = Batch;

    fn next(&mut self) -> Option<Self::Item> {
        if self.curr_batch >= self.n_batches {
            return None;
        }
        let start = self.curr_batch * self.batch_size;
        let end = (start + self.batch_size).min(self.indices.len());
        let batch_indices = &self.indices[start..end];
        self.curr_batch += 1;

        let n_features = self.data.first().map_or(0, Vec::len);
        let inputs = batch_indices
            .iter()
            .flat_map(|&i| self.data[i].iter().copied())
            .collect::<Vec<_>>();
        let labels = batch_indices
            .iter()
            .map(|&i| self.labels[i] as f32)
            .collect::<Vec<_>>();
        // shapes hold by construction: every row has `n_features` entries
        let inputs = Tensor::new(inputs, &[batch_indices.len(), n_features]).ok()?;
        let labels = Tensor::new(labels, &[batch_indices.len()]).ok()?;
        Some(Batch { inputs, labels })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.n_batches - self.curr_batch;
        (remaining, Some(remaining))
    }
}
