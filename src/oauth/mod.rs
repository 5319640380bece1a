mod client;
mod device;

pub use client::{CustomTokenFields, OauthTokenResponse, StandardOauth2Client, build_oauth2_client};
pub use device::{DeviceAuthorization, DevicePollOutcome, poll_device_flow};
pub(crate) use device::classify_standard_poll;
