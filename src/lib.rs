// src/lib.rs
pub mod types;
pub mod config;
pub mod metrics;
pub mod funding;
pub mod index;
pub mod store;
pub mod recorder;
pub mod aggregate;
pub mod view;
pub mod providers;
pub mod collector;
pub mod api;
