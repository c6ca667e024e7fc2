//! Fixed-size line windows, the last resort for every file.

use super::{Chunk, ChunkKind, SourceFile};

/// One `block` chunk when the file fits, otherwise overlapping windows.
pub fn chunk(file: &SourceFile) -> Vec<Chunk> {
    let total = file.lines.len();
    if total == 0 {
        return Vec::new();
    }

    let size = file.limits.max_chunk_lines.max(1);
    let overlap = file.limits.overlap_lines.min(size - 1);

    if total <= size {
        return vec![file.new_chunk(ChunkKind::Block, "block_1", 1, total)];
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    let mut n = 1;
    loop {
        let end = (start + size).min(total);
        chunks.push(file.new_chunk(ChunkKind::Block, &format!("block_{n}"), start + 1, end));
        if end == total {
            break;
        }
        start = end - overlap;
        n += 1;
    }
    chunks
}
