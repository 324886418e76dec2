//! Cluster record model and the record store.
//!
//! The [`store::ClusterStore`] trait is the persistence and change
//! notification contract shared by the API and the reconciler. Two
//! implementations ship here: [`store::MemoryStore`] for tests and
//! single-process use, and [`store::PgStore`] backed by PostgreSQL.

pub mod config;
pub mod models;
pub mod pool;
pub mod store;
pub mod watch;
