//! # Engine Module
//!
//! The stateful build machinery turning reference data into symmetry-resolved,
//! index-stable model contexts and their binary encoding.
//!
//! ## Overview
//!
//! A build pass borrows a [`ReferencePort`](crate::core::models::ports::ReferencePort)
//! snapshot through a [`context::BuildScope`] and fills a [`context::ModelContext`] stage by
//! stage. Every stage checks that its upstream stages exist and stops the pass on any
//! broken invariant. Reference edits go through the [`store`], where a [`conflict`]
//! pipeline resolves or rejects their side effects.
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`]) - tolerances, seed policy and parallelism
//! - **Contexts** ([`context`], [`ids`]) - the arena of one pass and its stable keys
//! - **Builders** ([`tasks`]) - structure, energy, transition and simulation stages
//! - **Translator** ([`translator`]) - fixed-layout binary records and blobs
//! - **Validation and Conflicts** ([`validation`], [`conflict`], [`store`]) - advisory
//!   issues and handler-driven conflict resolution
//! - **Progress Monitoring** ([`progress`]) - stage events for embedding applications
//! - **Error Handling** ([`error`]) - engine errors and tiered build reports

pub mod config;
pub mod conflict;
pub mod context;
pub mod error;
pub mod ids;
pub mod progress;
pub mod store;
pub mod tasks;
pub mod translator;
pub mod validation;
