//! Weld Core
//!
//! Core types and abstractions for the Weld workflow-run orchestrator.
//!
//! This crate contains:
//! - Domain types: workflows, node graphs, runs, node runs, parameters, statuses
//! - DTOs: requests exchanged between the REST layer and the orchestrator
//!
//! Note: orchestration logic lives in `weld-orchestrator`; this crate is data only.

pub mod domain;
pub mod dto;
