/// Bytes of stack that must remain before a new segment is allocated.
const RED_ZONE: usize = 100 * 1024;

/// Size of each newly allocated stack segment.
const STACK_PER_RECURSION: usize = 1024 * 1024;

/// Grows the stack on demand before running `f`.
///
/// Every recursive walk over the syntax tree goes through this: parsing,
/// resolving, bytecode generation and tree-walking evaluation. Deeply
/// nested scripts then never overflow the native stack.
#[inline]
pub fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}
