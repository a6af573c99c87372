pub mod database;
pub mod models;
pub mod project_repository;
pub mod transaction_repository;

pub use database::Database;
pub use models::{MarketType, Project, TransactionRecord, TransactionStatus, TransactionType};
pub use project_repository::ProjectRepository;
pub use transaction_repository::{TransactionFilter, TransactionRepository, TransactionStats};
