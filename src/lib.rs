pub mod client;
pub mod config;
pub mod frames;
pub mod lru;
pub mod merge;
pub mod method;
pub mod operation;
pub mod signal;
pub mod store;
pub mod stream;

#[cfg(test)]
pub(crate) mod testutil;

pub use client::{ClientError, HttpClient, OperationsClient};
pub use store::{DetailStore, DetailView, FetchOptions, FetchOutcome, StreamOutcome};
