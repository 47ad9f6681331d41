//! Management HTTP API

pub mod rest;

pub use rest::RestApi;
