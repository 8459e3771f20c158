//! Shared types for the Tidemark chat backend.
//!
//! Everything the server and its clients agree on lives here: the domain
//! models read from the relational store, the event envelope pushed over the
//! stream transport, and the layered configuration.

pub mod config;
pub mod models;
