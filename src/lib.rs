// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Estate Guard - Credential & Session Security Service
//!
//! Authentication, session lifecycle, device binding, brute-force defense and
//! permission resolution for the real estate resource API.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `auth` - Passwords, tokens, lockout, device binding and the auth gateway
//! - `config` - Environment settings and runtime security tunables
//! - `storage` - Store capabilities, redb and in-memory implementations

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod state;
pub mod storage;
