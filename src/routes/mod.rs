//! Route modules for the Depot server

pub mod health;
pub mod raw;
pub mod resources;
pub mod upload;
