//! Data Transfer Objects
//!
//! Requests handed to the orchestrator by the REST layer and background jobs.
//! DTOs are lightweight and carry no behaviour beyond small conveniences.

pub mod run;
