//! ---
//! rio_section: "08-testing-qa"
//! rio_subsection: "integration-tests"
//! rio_type: "source"
//! rio_scope: "code"
//! rio_description: "Integration and validation tests for the Rio stack."
//! rio_version: "v0.1.0-alpha"
//! rio_owner: "tbd"
//! ---
//! Shared fixtures live in the individual suites; this crate exists so
//! the workspace member builds as a test-only package.
