// Integration test suite for the local-agent-mail server core.
//
// Organized into focused modules by service area; all modules share the
// common::TestClient for DB lifecycle management.

mod common;

mod activity;
mod agents;
mod health_stats;
mod identity;
mod messaging;
mod poll;
mod sessions;
mod state_machine;
mod threads;
mod topics;
