pub mod database;
pub mod signal_repository;

pub use database::Database;
pub use signal_repository::SqliteSignalRepository;
