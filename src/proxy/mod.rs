pub mod handler;
pub mod sse;
pub mod stream_tee;
pub mod transform;
pub mod upstream;
