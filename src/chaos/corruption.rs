//! Response body corruption strategies.

use std::fmt;

use rand::Rng;
use serde::de::IgnoredAny;

/// Content-Length advertised when half the body would be zero.
pub const MIN_MISMATCHED_LENGTH: usize = 10;

/// Marker spliced into bodies that are not structured documents.
const MANGLE_MARKER: &str = "\u{FFFD}\u{FFFD}\u{FFFD}";

/// Marker spliced into the middle of structured documents.
const STRUCTURAL_MARKER: &[u8] = b"XXX";

/// One of the four ways a body gets mangled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    RandomBytes,
    Structural,
    Truncate,
    LengthMismatch,
}

impl Strategy {
    pub const ALL: [Strategy; 4] = [
        Strategy::RandomBytes,
        Strategy::Structural,
        Strategy::Truncate,
        Strategy::LengthMismatch,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::RandomBytes => "random_bytes",
            Strategy::Structural => "structural",
            Strategy::Truncate => "truncate",
            Strategy::LengthMismatch => "content_length_mismatch",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Textual edits applied to bodies that parse as JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuralMutation {
    DropClosingBrace,
    DuplicateComma,
    DropQuote,
    ColonToEquals,
    InjectMarker,
}

impl StructuralMutation {
    pub const ALL: [StructuralMutation; 5] = [
        StructuralMutation::DropClosingBrace,
        StructuralMutation::DuplicateComma,
        StructuralMutation::DropQuote,
        StructuralMutation::ColonToEquals,
        StructuralMutation::InjectMarker,
    ];
}

/// Result of corrupting a body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Corrupted {
    pub body: Vec<u8>,
    /// Content-Length the caller must advertise instead of the real one.
    pub content_length: Option<usize>,
    pub strategy: Strategy,
}

/// Pick a strategy uniformly at random and apply it.
pub fn corrupt<R: Rng + ?Sized>(body: &[u8], rng: &mut R) -> Corrupted {
    let strategy = Strategy::ALL[rng.gen_range(0..Strategy::ALL.len())];
    apply(strategy, body, rng)
}

/// Apply a specific strategy.
pub fn apply<R: Rng + ?Sized>(strategy: Strategy, body: &[u8], rng: &mut R) -> Corrupted {
    let (body, content_length) = match strategy {
        Strategy::RandomBytes => (corrupt_random_bytes(body, rng), None),
        Strategy::Structural => (corrupt_structure(body, rng), None),
        Strategy::Truncate => (truncate(body), None),
        Strategy::LengthMismatch => (body.to_vec(), Some(mismatched_length(body.len()))),
    };

    Corrupted {
        body,
        content_length,
        strategy,
    }
}

/// Overwrite 5-20% of the bytes (at least one) at random positions.
///
/// Each hit stores a value different from the original byte at that position.
pub fn corrupt_random_bytes<R: Rng + ?Sized>(body: &[u8], rng: &mut R) -> Vec<u8> {
    let mut corrupted = body.to_vec();
    if body.is_empty() {
        return corrupted;
    }

    let fraction: f64 = rng.gen_range(0.05..0.20);
    let count = ((body.len() as f64 * fraction) as usize).max(1);

    for _ in 0..count {
        let pos = rng.gen_range(0..body.len());
        corrupted[pos] = body[pos] ^ rng.gen_range(1..=u8::MAX);
    }

    corrupted
}

/// Break a JSON document with one random edit, or mangle anything else.
pub fn corrupt_structure<R: Rng + ?Sized>(body: &[u8], rng: &mut R) -> Vec<u8> {
    if body.is_empty() {
        return Vec::new();
    }
    if serde_json::from_slice::<IgnoredAny>(body).is_err() {
        return mangle(body);
    }

    let mutation = StructuralMutation::ALL[rng.gen_range(0..StructuralMutation::ALL.len())];
    mutate_structure(body, mutation)
}

pub fn mutate_structure(body: &[u8], mutation: StructuralMutation) -> Vec<u8> {
    let mut out = body.to_vec();
    let find = |needle: u8| body.iter().position(|&b| b == needle);

    match mutation {
        StructuralMutation::DropClosingBrace => {
            if let Some(idx) = find(b'}') {
                out.remove(idx);
            }
        }
        StructuralMutation::DuplicateComma => {
            if let Some(idx) = find(b',').filter(|&idx| idx > 0) {
                out.insert(idx + 1, b',');
            }
        }
        StructuralMutation::DropQuote => {
            if let Some(idx) = find(b'"').filter(|&idx| idx > 0) {
                out.remove(idx);
            }
        }
        StructuralMutation::ColonToEquals => {
            if let Some(idx) = find(b':') {
                out[idx] = b'=';
            }
        }
        StructuralMutation::InjectMarker => {
            if out.len() > 2 {
                let mid = out.len() / 2;
                out.splice(mid..mid, STRUCTURAL_MARKER.iter().copied());
            }
        }
    }

    out
}

/// Replace three bytes at the midpoint with the replacement-character marker.
pub fn mangle(body: &[u8]) -> Vec<u8> {
    if body.len() <= 4 {
        return body.to_vec();
    }

    let mid = body.len() / 2;
    let mut out = Vec::with_capacity(body.len() + MANGLE_MARKER.len());
    out.extend_from_slice(&body[..mid]);
    out.extend_from_slice(MANGLE_MARKER.as_bytes());
    out.extend_from_slice(&body[mid + 3..]);
    out
}

/// First half of the body; one-byte and empty bodies are returned as-is.
pub fn truncate(body: &[u8]) -> Vec<u8> {
    let half = body.len() / 2;
    if half == 0 {
        return body.to_vec();
    }
    body[..half].to_vec()
}

/// Content-Length to advertise for a body of `len` bytes.
pub fn mismatched_length(len: usize) -> usize {
    match len / 2 {
        0 => MIN_MISMATCHED_LENGTH,
        half => half,
    }
}
