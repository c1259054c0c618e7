//! Network interface selection.

use tracing::debug;

use livekey_ipc::NetworkDevice;

use crate::error::CaptureError;
use crate::CaptureResult;

/// Description fragments of adapters skipped by automatic selection.
pub const DENIED_DESCRIPTIONS: &[&str] = &[
    "Bluetooth",
    "loopback",
    "Loopback",
    "Virtual",
    "VMware",
    "Hyper-V",
];

/// Narrow `devices` down to the ones to listen on.
///
/// With a non-empty `configured` list, keeps exactly the devices whose
/// description equals one of its entries; configured names that match
/// nothing are ignored. With an empty list, keeps every device whose
/// description contains none of [`DENIED_DESCRIPTIONS`].
pub fn select_interfaces(
    devices: &[NetworkDevice],
    configured: &[String],
) -> CaptureResult<Vec<NetworkDevice>> {
    let selected: Vec<NetworkDevice> = if configured.is_empty() {
        devices
            .iter()
            .filter(|device| !is_denied(&device.description))
            .cloned()
            .collect()
    } else {
        devices
            .iter()
            .filter(|device| configured.iter().any(|name| *name == device.description))
            .cloned()
            .collect()
    };

    for name in configured {
        if !devices.iter().any(|device| device.description == *name) {
            debug!(interface = %name, "Configured interface not present");
        }
    }

    if selected.is_empty() {
        return Err(CaptureError::NoInterfaces);
    }

    debug!(
        available = devices.len(),
        selected = selected.len(),
        "Selected interfaces"
    );
    Ok(selected)
}

fn is_denied(description: &str) -> bool {
    DENIED_DESCRIPTIONS
        .iter()
        .any(|fragment| description.contains(fragment))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn devices() -> Vec<NetworkDevice> {
        vec![
            NetworkDevice::new("eth0", "Ethernet"),
            NetworkDevice::new("wlan0", "Wi-Fi"),
        ]
    }

    fn names(devices: &[NetworkDevice]) -> Vec<&str> {
        devices.iter().map(|d| d.name.as_str()).collect()
    }

    #[test]
    fn test_configured_list_selects_by_description() {
        let selected = select_interfaces(&devices(), &["Wi-Fi".to_string()]).unwrap();
        assert_eq!(names(&selected), vec!["wlan0"]);
    }

    #[test]
    fn test_empty_list_skips_denied_adapters() {
        let mut all = devices();
        all.push(NetworkDevice::new("bt0", "Bluetooth Adapter"));
        all.push(NetworkDevice::new("lo", "Adapter for loopback traffic capture"));

        let selected = select_interfaces(&all, &[]).unwrap();
        assert_eq!(names(&selected), vec!["eth0", "wlan0"]);
    }

    #[test]
    fn test_unknown_configured_names_are_dropped() {
        let configured = vec!["Wi-Fi".to_string(), "Cellular".to_string()];
        let selected = select_interfaces(&devices(), &configured).unwrap();
        assert_eq!(names(&selected), vec!["wlan0"]);
    }

    #[test]
    fn test_match_is_exact() {
        let err = select_interfaces(&devices(), &["wi-fi".to_string()]).unwrap_err();
        assert!(matches!(err, CaptureError::NoInterfaces));
    }

    #[test]
    fn test_no_devices_is_an_error() {
        assert!(matches!(
            select_interfaces(&[], &[]),
            Err(CaptureError::NoInterfaces)
        ));

        let only_virtual = vec![NetworkDevice::new("v0", "Hyper-V Virtual Ethernet Adapter")];
        assert!(matches!(
            select_interfaces(&only_virtual, &[]),
            Err(CaptureError::NoInterfaces)
        ));
    }
}
