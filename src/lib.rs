//! Graphviz rendering service: a bounded, sandboxed `dot` pipeline behind an HTTP API.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
