//! Integration tests for the strata shared state engine

mod config_integration;
mod context_inheritance;
mod event_replay;
mod schema_validation;
mod transform_pipeline;
