//! Core domain types
//!
//! This module contains the core domain structures used across Weld services.
//! These types represent the fundamental business entities and are shared between
//! the orchestrator (which mutates runs) and its collaborators (which persist,
//! publish or display them).

pub mod parameter;
pub mod project;
pub mod run;
pub mod status;
pub mod trigger;
pub mod user;
pub mod vcs;
pub mod workflow;
