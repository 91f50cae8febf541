pub mod calendar;
pub mod config;
pub mod engine;
pub mod form;
pub mod housekeeping;
pub mod limits;
pub mod model;
pub mod observability;
pub mod session;
pub mod store;
pub mod wal;
