// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Observability and tracing utilities.
//!
//! This module provides structured tracing support for fragcache operations.
//! The crate only emits spans and events through the `tracing` facade; the
//! application chooses and installs the subscriber.

pub(crate) mod spans;

// Note: All span functions are internal (pub(crate)) and not re-exported
