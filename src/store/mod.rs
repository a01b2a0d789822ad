//! Persistent store collaborators

pub mod archive;
pub mod client;
pub mod colors;

pub use archive::BlockArchive;
pub use client::StoreClient;
pub use colors::{ColorStore, UserColors};
