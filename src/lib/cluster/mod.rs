pub mod local;
pub mod stats;
pub mod types;

#[cfg(test)]
pub mod stub;
