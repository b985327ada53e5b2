// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! tether-core: wire protocol shared by the tether client and its backends.
//!
//! This crate provides the envelope types exchanged over a persistent
//! WebSocket, correlation id generation, and codec errors.

pub mod error;
pub mod id;
pub mod protocol;

pub use error::{decode_server_frame, Error, Result};
pub use id::IdGenerator;
pub use protocol::{
    CallRequest, ClientMessage, Route, SdkMessage, SdkPayload, SdkResult, ServerMessage,
    SessionCommand, SessionOptions,
};
