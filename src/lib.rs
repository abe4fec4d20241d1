pub mod api;
pub mod cli;
pub mod clock;
pub mod cluster;
pub mod datastore;
pub mod error;
pub mod limiters;
pub mod node;
pub mod protocol;
pub mod settings;
