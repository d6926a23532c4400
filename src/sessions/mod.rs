//! Server-side sessions kept in the key/value backend.

pub mod device;
pub mod error;
pub mod service;

pub use device::{detect_device_type, DeviceType};
pub use error::SessionError;
pub use service::{ClientInfo, CreatedSession, SessionData, SessionService, SessionStats, SessionSummary, SessionUser};
