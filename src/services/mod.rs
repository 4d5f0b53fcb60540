pub mod balancer;
pub mod dispatcher;
pub mod executor;
pub mod health;
pub mod omniparser;
pub mod queue;
pub mod registry;
pub mod sampler;
pub mod stats;
