//! Backend dispatch core of the nevermail mail client.
//!
//! Front ends post typed [`Action`]s to a [`Worker`] bound to one backend connection and get
//! a stream of [`WorkerMessage`]s back. [`MessageStore`] and [`DirectoryList`] fold those
//! streams into client-side state; [`search`] and [`export`] are the two bulk flows built on
//! the same primitive.

pub mod backend;
pub mod config;
pub mod core;
pub mod error;
pub mod export;
pub mod search;
pub mod store;
pub mod worker;

pub use error::{Error, Result};
pub use store::{DirStore, DirectoryList, MessageStore};
pub use worker::types::{Action, WorkerMessage};
pub use worker::Worker;
