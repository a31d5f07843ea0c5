//! Bootstrap module for initializing the logcdn server
//!
//! This module handles:
//! - Configuration loading
//! - Database connection and migrations
//! - Storage unit registration and service wiring

pub mod config;
pub mod database;
pub mod services;

pub use config::load_config;
pub use database::{init_database, run_migrations};
pub use services::{init_services, Services};
