//! Device notification subsystem boundary.
//!
//! The platform side of push — token issuance, the app-icon badge, and
//! dismissing delivered banners — lives in the host shell, not in this
//! core. The host hands the core one implementation of this trait per
//! process; tests substitute fakes.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeviceError {
    /// The platform refused or has not yet issued a push token
    /// (permissions denied, simulator, no APNs/FCM connectivity).
    #[error("push token unavailable: {0}")]
    TokenUnavailable(String),
}

/// What the core needs from the device's notification subsystem.
#[async_trait]
pub trait DeviceNotifications: Send + Sync {
    /// Obtain the platform push token for this device.
    async fn push_token(&self) -> Result<String, DeviceError>;

    /// Project an unread count onto the app icon badge. The badge is a
    /// projection of inbox state, never the source of truth.
    fn set_badge_count(&self, count: u32);

    /// Dismiss any notification banners still sitting in the system tray.
    fn dismiss_all_banners(&self);
}
