//! SQLite persistence adapters.

pub mod connection;
pub mod design_repository;
pub mod migrations;
pub mod pr_state_repository;

pub use connection::{create_test_pool, open_store};
pub use design_repository::{SqliteDesignOutputRepository, SqliteDesignRepository};
pub use migrations::{all_embedded_migrations, Migration, MigrationError, Migrator};
pub use pr_state_repository::SqlitePrStateRepository;
