//! Types, wire protocol and cryptography shared by the Parley relay and its
//! clients.

pub mod constants;
pub mod credential;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod reconcile;
pub mod types;
