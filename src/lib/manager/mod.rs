pub mod coordinator;
pub mod registry;
pub mod state_machine;
