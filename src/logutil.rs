//! Logging utilities for sanitizing message bodies and PDU payloads so logs
//! stay single-line. SMS bodies routinely carry newlines and RTL text;
//! raw PDUs are long hex strings worth truncating.

/// Escape a message body for single-line logging:
/// - `\n` => `\\n`
/// - `\r` => `\\r`
/// - `\t` => `\\t`
/// - backslash => `\\\\`
///   Truncates very long strings (over `MAX_PREVIEW` chars) with an ellipsis
///   to cap log noise.
pub fn escape_log(s: &str) -> String {
    const MAX_PREVIEW: usize = 200;
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

/// Shorten a raw PDU hex string for log lines, keeping head and tail.
///
/// The input is untrusted modem output and may carry arbitrary UTF-8, so
/// the cut points snap to character boundaries.
pub fn hex_snippet(hex: &str, max: usize) -> String {
    if hex.len() <= max || max < 8 {
        return hex.to_string();
    }
    let head_end = floor_char_boundary(hex, max / 2);
    let tail_start = ceil_char_boundary(hex, hex.len() - max / 2);
    format!(
        "{}…{} ({} chars)",
        &hex[..head_end],
        &hex[tail_start..],
        hex.chars().count()
    )
}

fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_char_boundary(s: &str, mut i: usize) -> usize {
    while !s.is_char_boundary(i) {
        i += 1;
    }
    i
}
