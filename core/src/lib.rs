pub mod auth;
pub mod db;
pub mod error;
pub mod legacy;
pub mod memory;
pub mod migration;
pub mod models;
pub mod seed;
pub mod service;
pub mod store;
pub mod transfer;
pub mod volume;
