//! Stack growth for the recursive passes.
//!
//! The parser, resolver and interpreter all recurse once per nesting level
//! of the source. Each of them enters its recursive rules through
//! [`ensure_sufficient_stack`], so deeply nested input moves onto freshly
//! allocated stack segments instead of overflowing the host stack.

/// Remaining stack below which the next call runs on a new segment.
const RED_ZONE: usize = 100 * 1024;

/// Size of each extra stack segment.
const STACK_PER_RECURSION: usize = 1024 * 1024;

#[inline]
pub(crate) fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}
