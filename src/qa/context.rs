// Context assembly under a character budget


pub const CONTEXT_DELIMITER: &str = "\n\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledContext {
    pub text: String,
    pub chunks_used: usize,
}

/// Join chunk texts, best first, while the result fits in `max_chars`.
///
/// Chunks are never split. The first chunk is always kept, even when it alone
/// exceeds the budget; after that assembly stops at the first chunk that does
/// not fit, so lower-ranked chunks are the ones dropped.
#[inline]
pub fn assemble_context<S: AsRef<str>>(ranked: &[S], max_chars: usize) -> AssembledContext {
    let delimiter_len = CONTEXT_DELIMITER.chars().count();
    let mut text = String::new();
    let mut length = 0;
    let mut chunks_used = 0;

    for chunk in ranked {
        let chunk = chunk.as_ref();
        let chunk_len = chunk.chars().count();

        if chunks_used > 0 {
            if length + delimiter_len + chunk_len > max_chars {
                break;
            }
            text.push_str(CONTEXT_DELIMITER);
            length += delimiter_len;
        }

        text.push_str(chunk);
        length += chunk_len;
        chunks_used += 1;
    }

    AssembledContext { text, chunks_used }
}
