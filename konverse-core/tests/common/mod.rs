// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Common Test Utilities
//!
//! Shared fixtures, helpers and proptest strategies for the integration tests.

#![allow(dead_code)]

pub mod fixtures;
pub mod helpers;
pub mod strategies;
