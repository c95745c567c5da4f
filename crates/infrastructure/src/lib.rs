pub mod database;
pub mod in_memory_repository;

pub use database::postgres::PostgresExecutionRepository;
pub use database::{create_pool, DEFAULT_CONNECT_TIMEOUT};
pub use in_memory_repository::InMemoryExecutionRepository;
