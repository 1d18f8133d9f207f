pub mod auth;
pub mod config;
pub mod document_client;
pub mod error;
pub mod http;
pub mod identity_client;
pub mod models;
pub mod notify;
pub mod payment;
pub mod pricing;
pub mod service;
pub mod stats;
pub mod status;
pub mod store;
pub mod tracking;
