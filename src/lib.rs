pub mod api;
pub mod clock;
pub mod config;
pub mod error;
pub mod ids;
pub mod matches;
pub mod quiz;
pub mod store;
