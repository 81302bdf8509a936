//! Scenario regression tests, colocated rather than under a top-level
//! `tests/` directory: the kernel binary has no userspace to run a
//! black-box test binary against.

#[cfg(test)]
mod scenarios;

#[cfg(test)]
pub(crate) mod support;
