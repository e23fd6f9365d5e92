mod accounts;
mod groups;

pub use accounts::AccountRepo;
pub use groups::GroupRepo;
