//! Purpose: Library crate behind the `fanrelay` CLI and its tests.
//! Exports: `core` (selection, resolution, config, errors) and `api` (endpoint, forwarder, host).
//! Role: Lets independent nodes deliver a message to clients held by any of them.
//! Invariants: Connection and room state are injected, never ambient globals.
//! Invariants: Local delivery always happens before any peer is contacted.
pub mod api;
pub mod core;
