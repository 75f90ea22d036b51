//! Capability mapping layer.
//!
//! Describes how a Bus capability ("facade") is represented on the Edge:
//! which resource paths it occupies, which operations each path accepts,
//! and how values are transformed in each direction.
//!
//! ## Architecture
//!
//! ```text
//! Bus capability                 Edge resources
//! Facades/Dimmable  ──────────→  /3311/0/5851  GET,PUT  Int
//!   state "brightness"             put: SetScaled{100}   (42 → 0.42)
//!                                  send: Scale{100}      (0.42 → 42)
//! Facades/HasTemperature ─────→  /3303/0/5700  GET     Float
//!                                /3303/0/5603  static  0.0
//! ```

pub mod mapping;
pub mod transforms;

pub use mapping::{AddressEntry, CapabilityMapping, Operation, ResourceSpec, ValueType};
pub use transforms::{BusAction, Handler, Sender, TransformError};
