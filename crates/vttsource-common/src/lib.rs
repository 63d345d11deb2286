//! Vttsource-Common: shared error type and identifiers.
//!
//! - **Error Handling**: one error enum covering parameter, access, parse,
//!   state and capacity failures, plus a result alias
//! - **Typed IDs**: UUID wrappers for media sources and source buffers
//!
//! # Examples
//!
//! ```
//! use vttsource_common::{Error, ErrorKind, MediaSourceId, Result};
//!
//! let source = MediaSourceId::new();
//! assert_ne!(source, MediaSourceId::new());
//!
//! fn example() -> Result<()> {
//!     Err(Error::state("abort while not updating"))
//! }
//! assert_eq!(example().unwrap_err().kind(), ErrorKind::State);
//! ```

pub mod error;
pub mod ids;

pub use error::{Error, ErrorKind, Result};
pub use ids::*;
