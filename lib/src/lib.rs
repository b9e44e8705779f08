//! Rewrite JVM class files so every declared method immediately returns `null`
//!
//! The pipeline mirrors a tiny compiler: a structural front end that parses a class file and
//! edits method bodies at the statement level ([`editor`]), and a lower-level back end that
//! rebuilds the verification metadata those edits invalidate by re-deriving stack map frames
//! from the control flow graph ([`repair`]). The [`transform::Dispatcher`] strings the stages
//! together behind the class-load hook contract a host runtime expects.
//!
//! ```
//! use retnull::transform::{Config, Dispatcher, Outcome, TargetRegistry};
//!
//! let registry = TargetRegistry::new(["com.acme.Widget"]);
//! let dispatcher = Dispatcher::new(
//!     Config {
//!         repair_frames: true,
//!         ..Config::default()
//!     },
//!     registry,
//! );
//!
//! // Not a target: the host keeps the original buffer
//! assert!(matches!(
//!     dispatcher.transform("com/acme/Other", &[0xCA, 0xFE, 0xBA, 0xBE]),
//!     Outcome::Unchanged
//! ));
//! ```

pub mod editor;
pub mod jvm;
pub mod repair;
pub mod transform;
pub mod util;
