pub mod btle;
pub mod codec;
pub mod constants;
pub mod dispatcher;
pub mod engine;
pub mod machine;
pub mod store;
pub mod transport;
pub mod types;
