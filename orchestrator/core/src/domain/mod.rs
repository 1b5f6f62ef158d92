// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Pure fleet model: component specs, the dependency graph and its
//! algorithms, lifecycle and health state, and the collaborator traits the
//! application layer is driven through.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Types, state machines and graph algorithms with no I/O

pub mod component;
pub mod config;
pub mod cycle;
pub mod errors;
pub mod events;
pub mod failure;
pub mod graph;
pub mod health;
pub mod hot_swap;
pub mod lifecycle;
pub mod planning;
pub mod probe;
pub mod runtime;
pub mod snapshot;
