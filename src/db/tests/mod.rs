//! Shared database repository test infrastructure
//!
//! The same test logic runs against every repository implementation:
//!
//! - **In-memory**: the [`MemoryDb`](crate::db::MemoryDb) repositories
//! - **SQLite**: in-memory SQLite databases with the real migrations
//!   (requires the `database-sqlite` feature)
//!
//! Each test function takes an [`AccountTestContext`](accounts::AccountTestContext)
//! holding `&dyn AccountRepo` and `&dyn GroupRepo`.
