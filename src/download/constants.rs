//! Constants for attachment naming.

/// Hard cap on a composed file name, in bytes (collision suffix excluded).
pub const MAX_FILE_NAME_BYTES: usize = 240;

/// Cap on the sanitized source-title portion, in bytes.
pub const MAX_TITLE_BYTES: usize = 100;

/// Cap on the sanitized hint stem, in bytes.
pub const MAX_HINT_BYTES: usize = 120;

/// Longest extension (including the dot) carried over from a hint or URL.
pub const MAX_EXTENSION_BYTES: usize = 16;

/// Highest numeric suffix tried before giving up on a name.
pub const MAX_COLLISION_SUFFIX: u32 = 10_000;

/// Title portion used when the source title sanitizes to nothing.
pub const FALLBACK_TITLE: &str = "page";
