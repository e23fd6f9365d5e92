mod group;
mod principal;

pub use group::*;
pub use principal::*;
