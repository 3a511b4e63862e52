pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod repository;
pub mod routes;
pub mod schema;
pub mod state;
pub mod storage;
pub mod store;
pub mod validation;

pub use store::{DocumentStore, StoreError};
