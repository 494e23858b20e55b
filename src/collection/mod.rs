pub mod credential;
pub mod kind;
pub mod manager;
pub mod paths;
