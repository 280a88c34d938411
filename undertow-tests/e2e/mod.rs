//! End-to-end tests for Undertow
//!
//! Run the supervisor against a real gateway on a loopback listener, the way
//! a player session would.

mod supervisor_workflow;
