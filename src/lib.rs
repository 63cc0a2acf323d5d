pub mod api;
pub mod clinicorp;
pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod scheduler;
pub mod services;
pub mod workflow;
