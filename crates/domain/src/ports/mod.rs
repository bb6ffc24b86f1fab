pub mod controller;
pub mod kv;
