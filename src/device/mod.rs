pub mod btle;
pub mod codec;
pub mod constants;
pub mod controller;
#[cfg(test)]
pub(crate) mod fake;
pub mod scanner;
pub mod session;
pub mod store;
pub mod supervisor;
pub mod transport;
pub mod types;
