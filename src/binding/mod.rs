//! Binding Module - structured data paths
//!
//! - `instance`: [`BindingInstance`] and its [`Segment`]s
//! - `keys`: shared key table the segments point into
//! - `parser`: string paths → instances, with a per-parser cache
//!
//! ```text
//! "foo.bar[0]['a b']"  →  [Key(foo), Key(bar), Index(0), Key(a b)]  →  "foo.bar.0.a b"
//! ```

mod instance;
pub mod keys;
mod parser;

pub use instance::{BindingInstance, Segment};
pub use parser::{BindingContext, BindingParser, NoContext};
