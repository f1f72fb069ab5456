use std::fmt::Write;

pub mod bencode;
pub mod bitfield;
pub mod engine;
pub mod inspect;
pub mod metadata;
pub mod report;
pub mod storage;

pub use engine::{ContentItem, FillEvent, reconcile};

/// Lowercase hex encoding.
pub fn to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{:02x}", b);
    }
    s
}
