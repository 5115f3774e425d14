pub mod in_memory;
pub mod reputation;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
