//! Google account sign-in for the Gmail transport.

pub mod google;
pub mod token;

pub use google::{GoogleEndpoints, TokenManager};
pub use token::{Token, TokenRecord};
