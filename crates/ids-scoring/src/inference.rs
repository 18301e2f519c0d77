//! Pluggable inference backend (spec.md §4.4/§9: "define an interface
//! `predict_proba(matrix) -> [n]` with two backends"). The model artefact
//! is treated as opaque per spec.md §6, so both backends here interpret it
//! as a flat little-endian `f32` weight vector (`bias` followed by one
//! weight per feature) and score rows with a logistic function — a
//! concrete, self-contained stand-in for the real classifier the Feature
//! Store would otherwise load (see DESIGN.md).

use std::sync::Arc;

pub trait InferenceBackend: Send + Sync {
    /// Scores `rows` records of `cols` features each, packed row-major in
    /// `matrix`, returning one attack probability per row.
    fn predict_proba(&self, matrix: &[f32], rows: usize, cols: usize) -> anyhow::Result<Vec<f32>>;
}

#[derive(Clone)]
pub struct Weights {
    bias: f32,
    coefficients: Vec<f32>,
}

impl Weights {
    pub fn load(path: &str, num_features: usize) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)?;
        let mut floats = Vec::with_capacity(num_features + 1);
        for chunk in bytes.chunks_exact(4) {
            floats.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        }
        floats.resize(num_features + 1, 0.0);
        Ok(Weights {
            bias: floats[0],
            coefficients: floats[1..=num_features].to_vec(),
        })
    }

    fn score_row(&self, row: &[f32]) -> f32 {
        let z: f32 = self.bias
            + row
                .iter()
                .zip(self.coefficients.iter())
                .map(|(x, w)| x * w)
                .sum::<f32>();
        1.0 / (1.0 + (-z).exp())
    }
}

/// Single-threaded CPU fallback.
pub struct CpuBackend {
    weights: Weights,
}

impl CpuBackend {
    pub fn new(weights: Weights) -> Self {
        CpuBackend { weights }
    }
}

impl InferenceBackend for CpuBackend {
    fn predict_proba(&self, matrix: &[f32], rows: usize, cols: usize) -> anyhow::Result<Vec<f32>> {
        if matrix.len() < rows * cols {
            anyhow::bail!("matrix shorter than rows*cols: {} < {}", matrix.len(), rows * cols);
        }
        Ok((0..rows)
            .map(|r| self.weights.score_row(&matrix[r * cols..(r + 1) * cols]))
            .collect())
    }
}

/// Splits the batch across worker threads, the "accelerator" stand-in
/// named in spec.md §9 when no GPU/accelerator crate is available.
pub struct ThreadedBackend {
    weights: Arc<Weights>,
    threads: usize,
}

impl ThreadedBackend {
    pub fn new(weights: Weights, threads: usize) -> Self {
        ThreadedBackend {
            weights: Arc::new(weights),
            threads: threads.max(1),
        }
    }
}

impl InferenceBackend for ThreadedBackend {
    fn predict_proba(&self, matrix: &[f32], rows: usize, cols: usize) -> anyhow::Result<Vec<f32>> {
        if matrix.len() < rows * cols {
            anyhow::bail!("matrix shorter than rows*cols: {} < {}", matrix.len(), rows * cols);
        }
        let mut out = vec![0.0f32; rows];
        let chunk_rows = rows.div_ceil(self.threads).max(1);
        std::thread::scope(|scope| {
            let mut handles = Vec::new();
            for (chunk_idx, out_chunk) in out.chunks_mut(chunk_rows).enumerate() {
                let start_row = chunk_idx * chunk_rows;
                let weights = &self.weights;
                let matrix_slice = &matrix[start_row * cols..(start_row + out_chunk.len()) * cols];
                handles.push(scope.spawn(move || {
                    for (i, slot) in out_chunk.iter_mut().enumerate() {
                        let row = &matrix_slice[i * cols..(i + 1) * cols];
                        *slot = weights.score_row(row);
                    }
                }));
            }
            for h in handles {
                h.join().expect("inference worker thread panicked");
            }
        });
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights(bias: f32, coefficients: Vec<f32>) -> Weights {
        Weights { bias, coefficients }
    }

    #[test]
    fn cpu_and_threaded_backends_agree() {
        let w = weights(0.0, vec![1.0, 1.0]);
        let matrix = vec![1.0, 1.0, -1.0, -1.0, 0.0, 0.0];
        let cpu = CpuBackend::new(w.clone());
        let threaded = ThreadedBackend::new(w, 4);
        let a = cpu.predict_proba(&matrix, 3, 2).unwrap();
        let b = threaded.predict_proba(&matrix, 3, 2).unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-6);
        }
        assert!(a[0] > 0.5);
        assert!(a[1] < 0.5);
        assert!((a[2] - 0.5).abs() < 1e-6);
    }
}
