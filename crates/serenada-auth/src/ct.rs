//! Constant-time comparison to prevent timing side-channels

use subtle::ConstantTimeEq;

/// Constant-time equality over byte slices.
///
/// Always returns `false` for length mismatches; the length check itself
/// is not secret here (token lengths are public protocol constants).
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
