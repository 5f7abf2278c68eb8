//! Cueso - conversational control plane for Roku devices.
//!
//! A WebSocket chat server drives an LLM through a tool-calling loop;
//! tools execute against the Roku External Control Protocol, a web-search
//! service, and optional remote tool servers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐      ┌──────────────┐      ┌─────────────┐
//! │  WS bridge  │─────▶│    driver    │─────▶│  provider   │
//! │  (api::ws)  │      │  (session)   │      │ (chat-core) │
//! └──────┬──────┘      └──────┬───────┘      └─────────────┘
//!        │                    │
//!  ┌─────┴─────┐       ┌──────┴───────┐
//!  │   store   │       │   registry   │──▶ Roku ECP / search / remote
//!  └───────────┘       └──────────────┘
//! ```

pub mod api;
pub mod config;
pub mod core;

pub use config::Config;
