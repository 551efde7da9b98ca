//! Permission and location-service access.

/// Host permission system, consulted before every scan.
pub trait PlatformAccess: Send {
    fn has_required_permissions(&self) -> bool;

    /// Ask the host to grant the missing permissions. Non-blocking.
    fn request_permissions(&mut self);

    /// Whether this OS version needs location services on for BLE scans.
    fn location_service_required(&self) -> bool {
        false
    }

    fn is_location_service_enabled(&self) -> bool {
        true
    }

    fn prompt_enable_location(&mut self) {}
}

/// Desktop hosts grant BLE access to the process without prompts.
#[derive(Debug, Default, Clone, Copy)]
pub struct DesktopAccess;

impl PlatformAccess for DesktopAccess {
    fn has_required_permissions(&self) -> bool {
        true
    }

    fn request_permissions(&mut self) {}
}
