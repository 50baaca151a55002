//! Bearer-token principal resolution and the device-code authorization
//! flow.

mod device;
mod gate;

pub use device::{DeviceAuthService, PollResponse, StartResponse};
pub use gate::{require_admin_scope, validate_scopes, AuthGate};
