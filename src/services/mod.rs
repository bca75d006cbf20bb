//! Business logic services
//!
//! This module contains business logic separated from HTTP concerns.
//! Services work on the datastore and on the host and decoder abstractions
//! passed in, so they can be tested without a device.

pub mod archive;
pub mod auth;
pub mod backup;
pub mod certificate;
pub mod host;
pub mod network;
pub mod profile;
pub mod settings;
pub mod user;
