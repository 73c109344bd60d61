use serde::{Deserialize, Serialize};

/// Face location in pixel coordinates, in `(top, right, bottom, left)` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceBox {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl FaceBox {
    pub fn new(top: u32, right: u32, bottom: u32, left: u32) -> Self {
        Self { top, right, bottom, left }
    }

    /// Multiply every coordinate by `factor`, mapping a box found on a
    /// downscaled frame back to the original frame.
    pub fn scaled(&self, factor: u32) -> Self {
        Self {
            top: self.top.saturating_mul(factor),
            right: self.right.saturating_mul(factor),
            bottom: self.bottom.saturating_mul(factor),
            left: self.left.saturating_mul(factor),
        }
    }

    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    /// `(left, top, right, bottom)`, the ordering used by overlay renderers.
    pub fn ltrb(&self) -> (u32, u32, u32, u32) {
        (self.left, self.top, self.right, self.bottom)
    }
}

/// Face embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Compute Euclidean distance between two embeddings.
    ///
    /// Embeddings of different or zero dimension are incomparable and yield NaN.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() || self.values.is_empty() {
            return f32::NAN;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One face found by the analyzer: its box and the embedding extracted from it.
#[derive(Debug, Clone)]
pub struct Detection {
    pub face: FaceBox,
    pub embedding: Embedding,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance_identical() {
        let a = Embedding::new(vec![0.3, -0.2, 0.9]);
        assert_eq!(a.euclidean_distance(&a), 0.0);
    }

    #[test]
    fn test_euclidean_distance_345() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
        assert!((b.euclidean_distance(&a) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance_dimension_mismatch_is_nan() {
        let a = Embedding::new(vec![1.0, 9.0, 9.0]);
        assert!(a.euclidean_distance(&Embedding::new(vec![1.0])).is_nan());
        assert!(a.euclidean_distance(&Embedding::new(vec![])).is_nan());
        assert!(Embedding::new(vec![]).euclidean_distance(&Embedding::new(vec![])).is_nan());
    }

    #[test]
    fn test_face_box_scaled() {
        let face = FaceBox::new(10, 40, 30, 5);
        assert_eq!(face.scaled(4), FaceBox::new(40, 160, 120, 20));
        assert_eq!(face.scaled(1), face);
    }

    #[test]
    fn test_face_box_ltrb_and_size() {
        let face = FaceBox::new(10, 40, 30, 5);
        assert_eq!(face.ltrb(), (5, 10, 40, 30));
        assert_eq!(face.width(), 35);
        assert_eq!(face.height(), 20);
    }

    #[test]
    fn test_embedding_serializes_as_plain_array() {
        let e = Embedding::new(vec![1.0, 0.5]);
        assert_eq!(serde_json::to_string(&e).unwrap(), "[1.0,0.5]");
    }
}
