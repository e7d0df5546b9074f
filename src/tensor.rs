//! Input tensors and raw `f32` tensor files.

use std::path::Path;

use anyhow::{anyhow, Context, Result};

/// Dense `f32` tensor handed to an inference engine.
#[derive(Clone, Debug, PartialEq)]
pub struct InputTensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl InputTensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let expected = element_count(&shape)?;
        if data.len() != expected {
            return Err(anyhow!(
                "tensor shape {:?} needs {} values, received {}",
                shape,
                expected,
                data.len()
            ));
        }
        Ok(Self { shape, data })
    }

    /// Read a raw little-endian `f32` file and give it `shape`.
    pub fn from_file<P: AsRef<Path>>(path: P, shape: Vec<usize>) -> Result<Self> {
        let path = path.as_ref();
        let data = read_f32_le(path)?;
        Self::new(shape, data).with_context(|| format!("bad input tensor {}", path.display()))
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }
}

pub(crate) fn element_count(shape: &[usize]) -> Result<usize> {
    if shape.is_empty() {
        return Err(anyhow!("tensor shape is empty"));
    }
    shape
        .iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| anyhow!("tensor shape {:?} overflows", shape))
}

/// Read a file of packed little-endian `f32` values.
pub fn read_f32_le<P: AsRef<Path>>(path: P) -> Result<Vec<f32>> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read tensor file {}", path.display()))?;
    decode_f32_le(&bytes).with_context(|| format!("bad tensor file {}", path.display()))
}

pub fn decode_f32_le(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(anyhow!(
            "{} bytes is not a whole number of f32 values",
            bytes.len()
        ));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
