use cloudreg_core::{Error, Result};

/// Fixed-length descriptor per point. FPFH uses the default length of 33.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature<const D: usize = 33> {
    pub data: Vec<[f64; D]>,
}

impl<const D: usize> Feature<D> {
    pub fn new(data: Vec<[f64; D]>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn dimension(&self) -> usize {
        D
    }

    pub fn select_by_index(&self, indices: &[usize]) -> Result<Self> {
        indices
            .iter()
            .map(|&i| {
                self.data.get(i).copied().ok_or_else(|| {
                    Error::InvalidInput(format!(
                        "Feature index {} out of range for {} descriptors",
                        i,
                        self.data.len()
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()
            .map(Self::new)
    }
}
