/// Rough token estimate used for transcript budgeting: one token per four
/// bytes of UTF-8, rounded up. Providers count tokens differently; the
/// truncation policy only needs a stable, monotonic approximation.
pub fn estimate_tokens(text: &str) -> usize {
    let bytes = text.len();
    bytes.saturating_add(3) / 4
}
