//! Parallel processing utilities.

/// Multiplier for number of chunks relative to CPU threads.
/// 2x threads gives good load balancing when some chunks finish faster.
const CHUNKS_PER_THREAD: usize = 2;

/// Compute rows per chunk for parallel image processing.
///
/// Divides the image height into roughly `num_cpus * 2` chunks.
/// Minimum of 1 row per chunk.
#[inline]
pub fn rows_per_chunk(height: usize) -> usize {
    let num_chunks = rayon::current_num_threads() * CHUNKS_PER_THREAD;
    (height / num_chunks).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_per_chunk_minimum() {
        assert!(rows_per_chunk(1) >= 1);
        assert!(rows_per_chunk(0) >= 1);
    }
}
