use std::fmt::Write;

use crate::{bencode::Bencode, to_hex};

/// Hex characters shown before a binary preview is cut off.
pub const TRUNC_HEX_LEN: usize = 64;

/// Renders a decoded value as indented, human-readable text.
pub fn render(value: &Bencode) -> String {
    let mut out = String::new();
    render_into(value, 0, &mut out);
    out.push('\n');
    out
}

/// Text when `bytes` is UTF-8 without low control characters, otherwise a
/// length and truncated hex summary.
pub fn bytes_preview(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) if !s.chars().any(|c| (c as u32) < 9) => format!("{:?}", s),
        _ => {
            let mut hex = to_hex(bytes);
            if hex.len() > TRUNC_HEX_LEN {
                hex.truncate(TRUNC_HEX_LEN);
                hex.push_str("...");
            }
            format!("<bytes len={} hex={}>", bytes.len(), hex)
        }
    }
}

fn key_preview(key: &[u8]) -> String {
    match std::str::from_utf8(key) {
        Ok(s) => format!("{:?}", s),
        Err(_) => bytes_preview(key),
    }
}

fn render_into(value: &Bencode, depth: usize, out: &mut String) {
    let pad = "  ".repeat(depth + 1);
    match value {
        Bencode::Int(i) => {
            let _ = write!(out, "{}", i);
        }
        Bencode::Bytes(b) => out.push_str(&bytes_preview(b)),
        Bencode::List(items) if items.is_empty() => out.push_str("[]"),
        Bencode::List(items) => {
            out.push_str("[\n");
            for (n, item) in items.iter().enumerate() {
                out.push_str(&pad);
                render_into(item, depth + 1, out);
                out.push_str(if n + 1 < items.len() { ",\n" } else { "\n" });
            }
            out.push_str(&"  ".repeat(depth));
            out.push(']');
        }
        Bencode::Dict(map) if map.is_empty() => out.push_str("{}"),
        Bencode::Dict(map) => {
            out.push_str("{\n");
            for (n, (k, v)) in map.iter().enumerate() {
                let _ = write!(out, "{}{}: ", pad, key_preview(k));
                render_into(v, depth + 1, out);
                out.push_str(if n + 1 < map.len() { ",\n" } else { "\n" });
            }
            out.push_str(&"  ".repeat(depth));
            out.push('}');
        }
    }
}
