//! Logging helpers for raw queue lines. A corrupt entry can contain
//! arbitrary bytes; previews keep log output single-line and bounded.

/// Render a raw line for single-line logging:
/// - `\n` => `\\n`, `\r` => `\\r`, `\t` => `\\t`, backslash => `\\\\`
/// - other control characters as `\xNN`
///   Truncated at `MAX_PREVIEW` characters with an ellipsis.
pub fn preview(s: &str) -> String {
    const MAX_PREVIEW: usize = 160; // queue lines are small; anything longer is garbage
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                use std::fmt::Write;
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}
