pub mod manager;
pub mod migrations;

pub use manager::{DatabaseError, DatabaseManager};
pub use migrations::{MigrationError, MigrationStep};
