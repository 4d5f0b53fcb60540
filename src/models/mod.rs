pub mod api;
pub mod instance;
pub mod job;
pub mod parse;
pub mod stats;
