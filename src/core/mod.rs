pub mod config;
pub mod ledger;
pub mod lifecycle;
pub mod scheduler;
pub mod terminal;
