//! Durable backends for the persistence sidecar.

mod redis;

pub use redis::RedisStore;
