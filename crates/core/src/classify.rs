use serde::{Deserialize, Serialize};

/// Largest payload the Graph `:/content` endpoint accepts in one request.
pub const SINGLE_SHOT_MAX_BYTES: u64 = 4 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeClass {
    Small,
    Large,
}

pub fn classify(size_bytes: u64) -> SizeClass {
    if size_bytes <= SINGLE_SHOT_MAX_BYTES {
        SizeClass::Small
    } else {
        SizeClass::Large
    }
}
