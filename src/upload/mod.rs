//! Resumable chunked uploads
//!
//! Uploads arrive split across many HTTP requests, one chunk per request,
//! keyed by a client-supplied upload identifier. Chunks land in a staging
//! area and are concatenated into the destination file once the declared
//! final chunk arrives.
//!
//! Protocol flow:
//! 1. Client sends each chunk with its 1-based index and the declared total
//! 2. A dropped connection is resumed by probing which chunks arrived
//! 3. The write carrying `index == total` triggers reassembly
//! 4. Staging state is removed after a successful reassembly

pub mod chunk_store;
pub mod reassembler;

pub use chunk_store::ChunkStore;
pub use reassembler::reassemble;

/// File-name prefix for staged chunks: `part1`, `part2`, ...
pub const PART_PREFIX: &str = "part";
