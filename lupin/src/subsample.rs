//! Streaming data through placeholders in minibatches.
//!
//! A model declares its data as a placeholder of batch shape, the
//! observed variable's log density is scaled by `N / M` so the log joint
//! stays an unbiased estimate of the full-data one, and every update is
//! preceded by a `feed` of the next batch.

use candle_core::Tensor;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::{Error, Result};

/// Scale `N / M` of a minibatch of `batch` rows out of `n_total`
pub fn subsample_scale(n_total: usize, batch: usize) -> Result<f64> {
    if batch == 0 || batch > n_total {
        return Err(Error::InvalidArgument(format!(
            "minibatch of {} rows out of {}",
            batch, n_total
        )));
    }
    Ok(n_total as f64 / batch as f64)
}

/// Shuffled row indices split into equally sized chunks
pub struct Minibatches {
    samples: Vec<usize>,
    batch_size: usize,
    chunks: Vec<Vec<usize>>,
    rng: StdRng,
}

impl Minibatches {
    /// * `n` - number of rows
    /// * `batch_size` - rows per chunk, at most `n`
    /// * `seed` - seed of the shuffles
    pub fn new(n: usize, batch_size: usize, seed: u64) -> Result<Self> {
        subsample_scale(n, batch_size)?;
        let mut ret = Self {
            samples: (0..n).collect(),
            batch_size,
            chunks: vec![],
            rng: StdRng::seed_from_u64(seed),
        };
        ret.shuffle();
        Ok(ret)
    }

    /// Reshuffle rows into `⌊n / batch_size⌋` chunks; trailing rows of
    /// the permutation sit out until the next shuffle, so every chunk
    /// has exactly `batch_size` rows and matches the placeholder shape
    pub fn shuffle(&mut self) {
        self.samples.shuffle(&mut self.rng);
        self.chunks = self
            .samples
            .chunks_exact(self.batch_size)
            .map(|c| c.to_vec())
            .collect();
    }

    pub fn size(&self) -> usize {
        self.samples.len()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn num_batches(&self) -> usize {
        self.chunks.len()
    }

    pub fn batch(&self, b: usize) -> Option<&[usize]> {
        self.chunks.get(b).map(|c| c.as_slice())
    }

    /// Rows of `data` (along dimension 0) in chunk `b`
    pub fn select_rows(&self, data: &Tensor, b: usize) -> Result<Tensor> {
        let rows = self
            .batch(b)
            .ok_or_else(|| Error::InvalidArgument(format!("no minibatch #{}", b)))?;
        let idx: Vec<u32> = rows.iter().map(|&i| i as u32).collect();
        let idx = Tensor::from_vec(idx, rows.len(), data.device())?;
        Ok(data.index_select(&idx, 0)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use std::collections::HashSet;

    #[test]
    fn test_scale() -> Result<()> {
        assert_eq!(subsample_scale(1000, 100)?, 10.0);
        assert!(subsample_scale(10, 0).is_err());
        assert!(subsample_scale(10, 11).is_err());
        Ok(())
    }

    #[test]
    fn test_chunks_are_disjoint() -> Result<()> {
        let mb = Minibatches::new(10, 3, 7)?;
        assert_eq!(mb.num_batches(), 3);
        let mut seen = HashSet::new();
        for b in 0..mb.num_batches() {
            let chunk = mb.batch(b).unwrap_or_default();
            assert_eq!(chunk.len(), 3);
            for &i in chunk {
                assert!(seen.insert(i));
            }
        }
        Ok(())
    }

    #[test]
    fn test_select_rows() -> Result<()> {
        let data = Tensor::arange(0f32, 8., &Device::Cpu)?.reshape((4, 2))?;
        let mb = Minibatches::new(4, 2, 0)?;
        let rows = mb.select_rows(&data, 0)?.to_vec2::<f32>()?;
        let chunk = mb.batch(0).unwrap_or_default();
        for (row, &i) in rows.iter().zip(chunk.iter()) {
            assert_eq!(row[0], 2.0 * i as f32);
        }
        Ok(())
    }
}
