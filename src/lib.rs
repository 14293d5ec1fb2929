pub mod api;
pub mod classifier;
pub mod config;
pub mod errors;
pub mod flex_id;
pub mod import;
pub mod model;
pub mod player;
pub mod scheduler;
pub mod session;
pub mod setup;
pub mod store;
