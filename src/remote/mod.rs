// ABOUTME: Remote billing provider access - API trait, HTTP client and object envelopes
// ABOUTME: Everything above this module sees only RemoteObject values and RemoteError

pub mod client;
pub mod models;

pub use client::{
    form_params, BillingApi, HttpBillingClient, PageRequest, Params, RemoteResult, ResourcePath,
    PAGE_SIZE,
};
pub use models::{Event, ListPage, Lookup, RemoteObject};
