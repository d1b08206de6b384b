// src/core/mod.rs — Budget governance and the session loop

pub mod cost;
pub mod extract;
pub mod ledger;
pub mod orchestrator;
pub mod system_prompt;
pub mod trace;
pub mod truncation;
pub mod types;
