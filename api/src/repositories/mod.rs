pub mod portfolio_repository;
pub mod snapshot_repository;

pub use portfolio_repository::PostgresPortfolioRepository;
pub use snapshot_repository::PostgresSnapshotRepository;

use collector::StoreError;

/// 約束違反屬於資料問題，其餘視為資料庫不可用。
pub(crate) fn store_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db) => StoreError::Rejected(db.to_string()),
        other => StoreError::Unavailable(other.to_string()),
    }
}
