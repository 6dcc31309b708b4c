pub mod models;
pub mod repository;

pub use models::{Order, OrderStatus, User, Withdrawal};
pub use repository::{LedgerRepository, OrderLedger};
