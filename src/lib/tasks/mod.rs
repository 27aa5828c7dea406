pub mod docker;
pub mod spec;
pub mod state;
pub mod types;
