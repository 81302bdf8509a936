//! Minimal debugging helpers used by the panic handler.
//!
//! There is no symbol table embedded in the kernel image, so symbol
//! resolution is a stub; it exists so the panic dump has a stable call site
//! to grow into later rather than inlining "unknown" everywhere.

pub fn resolve_symbol(_addr: usize) -> &'static str {
    "<no symbol table>"
}
