pub mod auth;
pub mod emulator;
pub mod health;
pub mod views;

pub use views::{ViewResolver, create_view_resolver};
