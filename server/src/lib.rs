pub mod config;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod models;
pub mod routes;
pub mod state;
pub mod tracker;
