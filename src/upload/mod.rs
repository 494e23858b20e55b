pub mod coordinator;
pub mod submit;
