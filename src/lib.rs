// ABOUTME: Library root for billing-mirror - exports the mirror engine and its surfaces
// ABOUTME: Mirrors a billing provider's object graph into a local reconciled store

pub mod billing;
pub mod bootstrap;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod entity;
pub mod error;
pub mod mirror;
pub mod reconcile;
pub mod remote;
pub mod schema;
pub mod state;
pub mod sync;
pub mod tags;
pub mod webhook;

pub use error::{MirrorError, RemoteError, RemoteErrorKind, Result};
