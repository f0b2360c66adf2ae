//! Conan - encrypted settings and server-list store for a connection manager

#![forbid(unsafe_code)]

pub mod aead;
pub mod archive;
pub mod armor;
pub mod config;
pub mod context;
pub mod credentials;
pub mod error;
pub mod file_ops;
pub mod passphrase;
pub mod repository;
pub mod secretcrypt;
pub mod servers;
pub mod settings;
pub mod sync;

pub use error::{ConanError, ErrorCategory, ErrorKind, Result};
