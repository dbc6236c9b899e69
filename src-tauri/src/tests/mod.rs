//! Integration tests for tool capability resolution
//!
//! These tests validate that tool calling works correctly with real model inference.
//! Tests require Foundry Local to be running.

pub mod agentic_integration;
pub mod embedded_sqlite_tests;
pub mod tool_capability_integration;



