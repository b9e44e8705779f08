//! The class file binary format and its small supporting vocabulary
//!
//! [`class_file`] holds the structural model (constant pool, fields, methods, attributes,
//! stack map frames); this module's own files cover the pieces shared by everything that
//! touches the format: the [`Serialize`]/[`Deserialize`] traits, access flags, descriptors,
//! and the parse/encode error types.

mod access_flags;
mod binary_format;
pub mod class_file;
mod descriptors;
mod errors;

pub use access_flags::*;
pub use binary_format::*;
pub use descriptors::*;
pub use errors::*;
