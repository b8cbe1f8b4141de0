//! Community API - account registration, activation and login
//!
//! This crate provides the identity flow of the community site:
//! - Registration with e-mail activation
//! - Password login with failed-attempt throttling
//! - Login through `GitHub` and `Google`, and linking those accounts to local users

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod mail;
pub mod routes;
pub mod services;
pub mod sessions;
pub mod state;
pub mod store;
pub mod throttle;
pub mod tokens;
pub mod utils;
