//! Structural editing of class files
//!
//! This is the "front end" of the transformation: [`Class::parse`] turns a byte buffer into a
//! mutable model whose method bodies are sequences of statements, [`insert_null_return`]
//! prepends the result-replacing statement to every declared method, and [`Class::serialize`]
//! compiles the statements back down to bytes, mechanically shifting every absolute program
//! counter recorded around the moved instructions.
//!
//! What the editor deliberately does *not* do is recompute the stack map frames its edits have
//! invalidated. Frames are a whole-method dataflow artifact, not something a local edit can
//! patch; rebuilding them from the control flow graph is the job of [`crate::repair`], which
//! works on the serialized bytes this module emits.

mod class;
mod errors;
mod method;

pub use class::*;
pub use errors::*;
pub use method::*;
