pub mod user;
pub mod user_activation;
pub mod user_auth;
pub mod user_profile;
pub mod user_role;
