pub mod feature;
pub mod feature_store;
pub mod file_lock;
