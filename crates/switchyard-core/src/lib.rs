//! # switchyard-core
//!
//! Foundation types shared by every Switchyard crate:
//!
//! - **Branded IDs**: `ConnectionId`, `SessionId`, `UserId` as newtypes for type safety
//! - **Errors**: `RelayError` and `StoreError` via `thiserror`, with stable machine codes
//! - **Logging**: `tracing` subscriber initialization (compact or JSON)

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;

pub use errors::{LimitScope, RelayError, Result, StoreError};
pub use ids::{ConnectionId, SessionId, UserId};
