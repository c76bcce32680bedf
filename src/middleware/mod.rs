//! Middleware module
//!
//! Inbound request middleware

pub mod auth;
