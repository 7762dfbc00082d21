//! Conversation-turn pipeline for the Promise-to-Pay recoveries agent.
//!
//! This crate is the part of the system with real state and invariants:
//! - **Prompt resolution** (`prompts`) - named prompt -> text, with tiered
//!   fallback and time-bounded caching
//! - **Commitment detection** (`detector`) - cheap heuristic gate deciding
//!   whether a turn pays for an extraction call
//! - **Model invocation** (`llm`) - one trait, two transports (direct
//!   provider call or tool-invocation gateway), selected at construction
//! - **Session state** (`session`) - at-most-one recorded PTP per session,
//!   first-committed-wins
//! - **Orchestration** (`orchestrator`) - the per-turn pipeline tying the
//!   above together
//!
//! # Safety Principle
//!
//! The model never decides whether a promise is recorded. It produces prose
//! and, on request, a structured candidate; the deterministic validator in
//! `recoveries-core` is the only authority on what gets written.

pub mod customers;
pub mod detector;
pub mod extraction;
pub mod gateway;
pub mod llm;
pub mod orchestrator;
pub mod prompts;
pub mod session;
pub mod telemetry;

pub use orchestrator::{RecoveriesAgent, TurnError, TurnOutcome};
