pub mod message;
pub mod subscription;
