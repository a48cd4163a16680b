pub mod hybrid;
pub mod local;
pub mod types;

pub use local::{LocalStore, SearchOptions, TextSearchOptions, TrackedFile};
pub use types::{Filter, Record, RecordMetadata, SearchHit, Source, StoreStats};

/// Convert an f32 embedding slice to raw bytes for sqlite-vec.
pub fn embedding_to_bytes(embedding: &[f32]) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            embedding.as_ptr() as *const u8,
            embedding.len() * std::mem::size_of::<f32>(),
        )
    }
}

/// Convert raw little-endian bytes back to an f32 embedding.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes(chunk.try_into().unwrap()))
        .collect()
}

/// Map an L2 distance between unit vectors to cosine similarity.
///
/// For normalized vectors, `d^2 = 2 - 2*cos`, so `cos = 1 - d^2/2`.
pub fn l2_to_cosine(distance: f64) -> f64 {
    (1.0 - distance * distance / 2.0).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_bytes_round_trip() {
        let v = vec![0.25f32, -1.5, 3.0];
        let bytes = embedding_to_bytes(&v);
        assert_eq!(bytes.len(), 12);
        assert_eq!(bytes_to_embedding(bytes), v);
    }

    #[test]
    fn l2_zero_is_identical() {
        assert_eq!(l2_to_cosine(0.0), 1.0);
    }

    #[test]
    fn l2_orthogonal_is_zero_similarity() {
        // Unit vectors at 90 degrees are sqrt(2) apart.
        let sim = l2_to_cosine(std::f64::consts::SQRT_2);
        assert!(sim.abs() < 1e-9);
    }
}
