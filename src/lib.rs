pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod db;
pub mod engine;
pub mod entities;
pub mod error;
pub mod gateway;
pub mod geo;
pub mod server;
pub mod store;
