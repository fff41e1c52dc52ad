pub mod admin;
pub mod bootstrap;
pub mod config;
pub mod observability;
pub mod proxy;
pub mod route_store;
