//! OmniParser Queue
//!
//! Admission control and load balancing in front of a small pool of
//! OmniParser screen-parsing servers. Submissions wait in a bounded FIFO,
//! a single dispatcher routes them to the least-loaded online instance,
//! and a health monitor keeps per-instance status current.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
