//! Parsed form of the class file binary format
//!
//! Everything in this module maps one-to-one onto structures of [the format][0]: it parses what
//! is there and writes back what it holds, nothing more. Semantically richer views (statement
//! bodies, control flow graphs) live in [`crate::editor`] and [`crate::repair`] and are built on
//! top of these structures.
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html

mod attribute;
mod class;
mod constants;
mod field;
mod method;

pub use attribute::*;
pub use class::*;
pub use constants::*;
pub use field::*;
pub use method::*;
