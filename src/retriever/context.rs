//! Formatting ranked chunks into a bounded prompt section.
use crate::chunker::truncate_with_marker;

use super::RetrievalResult;

const BLOCK_SEPARATOR: &str = "\n\n";

/// One self-describing block: header lines, then the fenced body cut at
/// `chunk_char_cap` characters.
pub fn format_block(result: &RetrievalResult, chunk_char_cap: usize) -> String {
    let chunk = &result.chunk;
    let mut lines = vec![
        format!("### File: {}", chunk.relative_path),
        format!("### {}: {}", chunk.kind.label(), chunk.name),
        format!("### Lines: {}-{}", chunk.start_line, chunk.end_line),
    ];
    if let Some(sig) = &chunk.signature {
        lines.push(format!("### Signature: {sig}"));
    }
    if !result.match_sources.is_empty() {
        lines.push(format!("### Match reasons: {}", result.match_sources.join(", ")));
    }
    if !result.relevance.is_empty() {
        lines.push(format!("### Relevance: {}", result.relevance));
    }
    lines.push(format!("```{}", chunk.language));
    lines.push(truncate_with_marker(&chunk.content, chunk_char_cap));
    lines.push("```".to_string());
    lines.join("\n")
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackedContext {
    pub text: String,
    pub included: usize,
    pub dropped: usize,
    /// Characters in `text`, separators included.
    pub chars: usize,
}

/// Join blocks in rank order until the next one would exceed `max_chars`.
///
/// A block that does not fit ends packing; it is never cut, and nothing
/// after it is tried.
pub fn pack_blocks(blocks: &[String], max_chars: usize) -> PackedContext {
    let mut packed = PackedContext::default();
    let separator_chars = BLOCK_SEPARATOR.chars().count();

    for block in blocks {
        let separator = if packed.included == 0 { 0 } else { separator_chars };
        let block_chars = block.chars().count();
        if packed.chars + separator + block_chars > max_chars {
            break;
        }
        if packed.included > 0 {
            packed.text.push_str(BLOCK_SEPARATOR);
        }
        packed.text.push_str(block);
        packed.chars += separator + block_chars;
        packed.included += 1;
    }

    packed.dropped = blocks.len() - packed.included;
    packed
}
