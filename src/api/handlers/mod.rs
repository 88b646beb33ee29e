//! API handlers for vidtube.
//!
//! `users` holds the account endpoints; `auth` holds the token, password and
//! storage pieces they share; `response` holds the JSON envelope.

pub mod auth;
pub mod health;
pub mod response;
pub mod root;
pub mod users;
