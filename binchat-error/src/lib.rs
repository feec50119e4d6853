//! # binchat-error
//!
//! One error type for every binchat crate, in the OpenDAL style: a kind to
//! match on, a status that says whether retrying helps, and a trail of
//! operations plus key/value context for locating the cause.
//!
//! ```rust
//! use binchat_error::{Error, ErrorKind};
//!
//! fn append() -> binchat_error::Result<()> {
//!     Err(Error::new(ErrorKind::NoActiveSession, "no session started")
//!         .with_operation("SessionLog::append")
//!         .with_context("target", "/bin/ls"))
//! }
//!
//! let err = append().unwrap_err();
//! assert!(err.kind().is_precondition());
//! ```
//!
//! Foreign errors are attached with [`Error::set_source`]. The only `From`
//! impl is for `std::io::Error`, which the session log raises constantly.

mod error;
mod kind;
mod status;

pub use error::Error;
pub use kind::ErrorKind;
pub use status::ErrorStatus;

pub type Result<T> = std::result::Result<T, Error>;
