// src/lib.rs — Library root for the OpenKoi RLM runtime

pub mod cli;
pub mod core;
pub mod infra;
pub mod navigation;
pub mod provider;
pub mod sandbox;
pub mod tools;
