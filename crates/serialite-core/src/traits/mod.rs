// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Capability traits consumed by the coordination layer.

pub mod connection;

pub use connection::Connection;
