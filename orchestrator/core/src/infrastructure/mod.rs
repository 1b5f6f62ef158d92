// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Infrastructure
//!
//! In-process adapters: the broadcast event bus and the in-memory
//! snapshot store.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements domain collaborator traits and event delivery

pub mod event_bus;
pub mod snapshot_store;
