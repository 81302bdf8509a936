//! Architecture support. This kernel targets i686 only.

pub mod x86;
