pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod functions;
pub mod models;
pub mod services;
pub mod utils;
