//! `craft-engine`: the Craft Quality Engine core.
//!
//! Leaf-first modules, in the dependency order of the design document:
//! [`settings`] (Settings Resolver), [`patterns`] (Pattern Library),
//! [`registry`] (Model Registry & Router), [`transport`] (LLM Transport),
//! [`model`] (the shared data model — Voice Bundle, Scene Score,
//! Scaffold, Enhancement Outcome, Model Capability Record), [`analyzer`]
//! (the Scene Analyzer), [`scaffold`] (the Scaffold Generator),
//! [`enhancement`] (the Enhancement Engine), [`events`] (the
//! cross-component pub/sub bus), [`error`] (the closed error taxonomy
//! and RPC envelope), and [`work_order`] (the external work-order store
//! boundary scene scores and enhancement outcomes are recorded to).
//!
//! The Multi-Model Tournament Orchestrator is a separate consumer crate
//! (`craft-tournament`) built on top of this one; nothing in this crate
//! depends on it.

pub mod analyzer;
pub mod enhancement;
pub mod error;
pub mod events;
pub mod model;
pub mod patterns;
pub mod registry;
pub mod scaffold;
pub mod settings;
pub mod transport;
pub mod work_order;
