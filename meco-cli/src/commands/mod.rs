pub mod echo;
pub mod service;
pub mod start;
