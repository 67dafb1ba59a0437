//! Pinmonl-Common: shared types used by every pinmonl crate.
//!
//! - **Typed IDs**: UUID newtypes for jobs, pinls, and monls
//! - **Core Types**: job states, target kinds, and the provider [`Report`]
//! - **Error Handling**: the common [`Error`] enum and [`Result`] alias
//!
//! # Examples
//!
//! ```
//! use pinmonl_common::{Error, JobState, MonlId, Result};
//!
//! let monl = MonlId::new();
//! assert_eq!(JobState::Pending.to_string(), "pending");
//!
//! fn lookup() -> Result<()> {
//!     Err(Error::not_found("monl"))
//! }
//! assert!(lookup().is_err());
//! # let _ = monl;
//! ```

pub mod error;
pub mod ids;
pub mod report;
pub mod types;

pub use error::{Error, Result};
pub use ids::*;
pub use report::*;
pub use types::*;
