pub mod durable;
pub mod etcd;
pub mod memory;
pub mod store;
