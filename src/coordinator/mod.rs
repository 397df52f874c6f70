//! Query coordinator: request handlers, leader routing, balance and health
//!
//! The coordinator is responsible for:
//! - Loading and releasing collections and partitions through jobs
//! - Resource group and replica placement management
//! - Shard leader routing for query proxies
//! - Manual segment balance
//! - Fleet health probing

pub mod balance;
pub mod broker;
pub mod health;
pub mod http;
pub mod leader;
pub mod observer;
pub mod server;
pub mod services;
pub mod types;

pub use server::Coordinator;
pub use services::{Collaborators, QueryCoord, Stores};
