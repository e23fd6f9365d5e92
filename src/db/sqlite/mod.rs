mod accounts;
mod common;
mod groups;

pub use accounts::SqliteAccountRepo;
pub use groups::SqliteGroupRepo;
