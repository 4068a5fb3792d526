//! storefront-core: contest rules shared by the storefront service
//!
//! Everything in this crate is pure: no I/O, no clocks, no persistence.
//! Callers pass `now` and any stored facts in explicitly.

pub mod admission;
pub mod codes;
pub mod discount;
pub mod errors;
pub mod prizes;
pub mod types;
pub mod validation;

pub use admission::*;
pub use codes::*;
pub use discount::*;
pub use errors::*;
pub use prizes::*;
pub use types::*;
pub use validation::*;
