pub mod clean;
pub mod config;
pub mod importers;
pub mod persist;
pub mod pipeline;
pub mod split;
pub mod table;
pub mod utils;
