pub mod controller_api;
pub mod jobs;
pub mod kv;
pub mod notification;
pub mod orchestration;
