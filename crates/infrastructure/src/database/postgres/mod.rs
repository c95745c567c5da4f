pub mod postgres_execution_repository;

pub use postgres_execution_repository::PostgresExecutionRepository;
