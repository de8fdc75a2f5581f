//! Bearer token acquisition: credential environments, the token model, and the caching source.

pub mod credentials;
pub mod source;
pub mod token;

pub use credentials::*;
pub use source::*;
pub use token::*;
