pub mod api;
pub mod config;
pub mod engine;
pub mod feed;
pub mod humanize;
pub mod observability;
pub mod remote;
