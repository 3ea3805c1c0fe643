//! The Multi-Model Tournament Orchestrator (§4.7): structure variants,
//! parallel generation, ranking, and hybrid composition built on top of
//! `craft_engine`'s Scene Analyzer, Settings Resolver, and Transport.
//!
//! Module dependency order: `types` (no internal deps) -> `structure`,
//! `generation`, `ranking` (depend on `types` and `craft_engine`) ->
//! `hybrid` (depends on `types` and the Enhancement transform seam) ->
//! `tournament` (composes all of the above) -> `rpc` (wraps `tournament`,
//! and the `craft_engine` services it needs directly, in the §6 contract).
//!
//! `craft-engine` is the reusable core; this crate is one consumer of it,
//! exposing the Tournament plus a pass-through RPC surface for the rest of
//! the engine's services over one stdio binary.

pub mod generation;
pub mod hybrid;
pub mod ranking;
pub mod rpc;
pub mod structure;
pub mod tournament;
pub mod types;

pub use generation::{generate_variants, GenerationTask};
pub use hybrid::{create_hybrid, HybridError};
pub use ranking::rank;
pub use structure::{write_structure_variants, StructureError};
pub use tournament::{TournamentError, TournamentOrchestrator};
pub use types::{HybridSpan, Strategy, TournamentResult, Variant};
