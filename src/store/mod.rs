//! Persistence collaborator behind a narrow async trait.

pub mod libsql_backend;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use traits::{Contribution, FraudStore, NotificationContext};
