//! # Stowage Storage
//!
//! Journal devices for the stowage engine.
//!
//! A device is the byte-level home of one store's journal. It knows how to
//! append, read back, make durable and atomically replace its contents, and
//! nothing about the records written into it. Framing, checksums and replay
//! all live in `stowage_engine`.
//!
//! ## Available Devices
//!
//! - [`FileDevice`] - A journal file on the local file system
//! - [`MemoryDevice`] - A heap buffer, for ephemeral engines and tests
//!
//! ## Example
//!
//! ```rust
//! use stowage_storage::{JournalDevice, MemoryDevice, SyncMode};
//!
//! let mut device = MemoryDevice::new();
//! let offset = device.append(b"frame").unwrap();
//! device.sync(SyncMode::Data).unwrap();
//! assert_eq!(device.read_at(offset, 5).unwrap(), b"frame");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod device;
mod error;
mod file;
mod memory;

pub use device::{JournalDevice, SyncMode};
pub use error::{DeviceError, DeviceResult};
pub use file::FileDevice;
pub use memory::MemoryDevice;
