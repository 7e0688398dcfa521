pub mod clock;
pub mod entities;
pub mod errors;
pub mod naming;
pub mod ports;

pub use entities::*;
pub use errors::{DomainError, Result};
