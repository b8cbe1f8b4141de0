pub mod secret;

pub use secret::{generate_secret, is_well_formed_secret};
