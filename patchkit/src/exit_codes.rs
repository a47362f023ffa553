//! Stable exit codes for patchkit CLI commands.

/// Command succeeded; every operation applied or the drop is allowed.
pub const OK: i32 = 0;
/// Invalid input: unreadable files, malformed payload/config, bad selector.
pub const INVALID: i32 = 1;
/// `patchkit apply` ran but at least one operation failed.
pub const PARTIAL: i32 = 2;
/// `patchkit drop` rejected the move.
pub const REJECTED: i32 = 3;
