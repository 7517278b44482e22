//! Database models split into domain-specific modules.

pub mod book;
pub mod borrow;
pub mod borrow_request;
pub mod user;

pub use book::*;
pub use borrow::*;
pub use borrow_request::*;
pub use user::*;
