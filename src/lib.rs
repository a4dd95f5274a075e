//! # Bus Bridge - Managed Runtime to Native Message Bus
//!
//! Connects objects living in a garbage-collected managed runtime to a native,
//! reference-counted message bus:
//! - Lifetime arbitration between managed objects and their native counterparts
//! - Callback adapters that let the bus call back into managed listeners
//! - Signature-driven marshalling between managed values and bus arguments
//! - A bus attachment facade that owns every association it creates
//!
//! ## Architecture
//!
//! The facade owns the adapters; the native bus only borrows them:
//! ```text
//!   managed code ──→ ┌──────────────────────────────┐ ──→ NativeBus
//!                    │        Bus (facade)          │
//!                    │  ┌──────────┐ ┌───────────┐  │
//!                    │  │ Adapters │ │ Marshaller│  │
//!                    │  └──────────┘ └───────────┘  │
//!                    └──────────────────────────────┘
//!   managed code ←── Adapter ←── callback ←────────────── NativeBus
//! ```
//!
//! Callbacks arrive on native threads; each adapter attaches the thread to the
//! [`managed::Vm`] for the duration of the call and logs rather than propagates
//! any managed exception.

#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod bus;
pub mod context;
pub mod listeners;
pub mod managed;
pub mod msg;
pub mod native;
pub mod testing;
pub mod types;

// Internal utilities
pub mod observability;

pub use types::{Config, Error, Result};
