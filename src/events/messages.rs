//! Event code tables
//!
//! Each storable event type owns the code range starting at
//! `100 * type`. Templates are indexed by `code - offset`; the last entry of
//! every table is the type's "unknown code" template, which receives the raw
//! code through `%d`. Known templates receive the event's arguments through
//! `%s`, in order.

use super::types::{Event, EventType};

pub const CODE_OFFSET_CONFIG: u16 = 100;
pub const CODE_OFFSET_HEALTH: u16 = 200;
pub const CODE_OFFSET_MGMT: u16 = 300;
pub const CODE_OFFSET_DIAG_QUICK: u16 = 500;
pub const CODE_OFFSET_DIAG_PLATFORM_CONFIG: u16 = 600;
pub const CODE_OFFSET_DIAG_PM_META: u16 = 700;
pub const CODE_OFFSET_DIAG_SECURITY: u16 = 800;
pub const CODE_OFFSET_DIAG_FW_CONSISTENCY: u16 = 900;

pub const MGMT_CONFIG_GOAL_CREATED: u16 = 300;
pub const MGMT_CONFIG_GOAL_DELETED: u16 = 301;
pub const MGMT_NAMESPACE_CREATED: u16 = 302;
pub const MGMT_NAMESPACE_DELETED: u16 = 303;
pub const MGMT_NAMESPACE_MODIFIED: u16 = 304;
pub const MGMT_SENSOR_SETTINGS_CHANGE: u16 = 305;
pub const MGMT_FIRMWARE_UPDATE: u16 = 306;
pub const MGMT_SECURITY_PASSWORD_SET: u16 = 307;
pub const MGMT_SECURITY_PASSWORD_REMOVED: u16 = 308;
pub const MGMT_SECURITY_SECURE_ERASE: u16 = 309;
pub const MGMT_SECURITY_FROZEN: u16 = 310;

const CONFIG_MESSAGES: &[&str] = &[
    "The platform configuration data on DIMM %s is invalid.",
    "The BIOS has successfully applied the configuration goal on DIMM %s.",
    "The BIOS could not apply the configuration goal on DIMM %s because of errors in the goal data.",
    "The BIOS could not apply the configuration goal on DIMM %s because the system has insufficient resources.",
    "The BIOS could not apply the configuration goal on DIMM %s because of a firmware error.",
    "The BIOS could not apply the configuration goal on DIMM %s for an unknown reason.",
    "The BIOS has detected and successfully configured DIMM %s.",
    "The BIOS has detected a new DIMM %s. The new DIMM must be configured in order to be used.",
    "DIMM %s is missing.",
    "DIMM %s has been replaced with DIMM %s.",
    "DIMM %s has been replaced with a new DIMM %s. The new DIMM must be configured in order to be used.",
    "DIMM %s has been moved to a different position.",
    "A configuration was requested for DIMM %s that is unsupported due to a licensing issue.",
    "The configuration of DIMM %s is unsupported due to a licensing issue.",
    "The underlying software is missing or incompatible with this version of the management software.",
    "DIMM %s is not manageable by this version of the management software.",
    "A platform configuration change has logged an unknown event code %d.",
];

const HEALTH_MESSAGES: &[&str] = &[
    "The health monitor has detected that DIMM %s is reporting percentage used at %s%% which is above the alarm threshold %s%%.",
    "The health monitor has detected that DIMM %s is reporting a media temperature of %s C which is above the alarm threshold of %s C.",
    "The health monitor has detected that DIMM %s is reporting a media temperature of %s C which is below the alarm threshold of %s C.",
    "The health monitor has detected that DIMM %s is reporting a wear level of %s%% which is above the alarm threshold %s%%.",
    "The health monitor has detected that DIMM %s is reporting new %s media errors, total count is %s.",
    "The health monitor has detected that DIMM %s is reporting a change in health state from %s to %s.",
    "The health monitor has detected that DIMM %s is reporting that it has consumed %s spare die.",
    "The health monitor has detected that namespace %s is reporting a change in health state from %s to %s.",
    "The firmware on DIMM %s experienced an unsafe shutdown before its latest restart.",
    "The health monitor has detected that DIMM %s is reporting a controller temperature of %s C which is above the alarm threshold of %s C.",
    "The health monitor has detected that DIMM %s is reporting a controller temperature of %s C which is below the alarm threshold of %s C.",
    "The health monitor has detected that DIMM %s firmware has reported %s new errors.",
    "The health monitor has detected that DIMM %s is reporting a viral state.",
    "The health monitor has detected that one or more DIMMs in the system have different SKUs.",
    "The health monitor has detected that a sanitize operation is in progress on DIMM %s. A reboot will be required when complete to use the DIMM.",
    "The health monitor has detected that a sanitize operation has completed on DIMM %s. A reboot is required to use the DIMM.",
    "The health monitor has logged an unknown error code %d.",
];

const MGMT_MESSAGES: &[&str] = &[
    "A new configuration goal has been saved on DIMM %s.",
    "A configuration goal has been deleted from DIMM %s.",
    "A new namespace has been created. (Name: %s, UID: %s)",
    "A namespace has been deleted. (Name: %s, UID: %s)",
    "A namespace's settings have been modified. (Name: %s, UID: %s)",
    "The %s sensor settings have been changed on DIMM %s.",
    "The firmware has been updated on DIMM %s. (New version: %s)",
    "The security password has been set on DIMM %s.",
    "The security password has been removed from DIMM %s.",
    "The persistent data on DIMM %s has been securely erased.",
    "The security lock state is frozen on DIMM %s.",
    "The management software logged an unknown event code %d.",
];

const DIAG_QUICK_MESSAGES: &[&str] = &[
    "The quick health check succeeded.",
    "The quick health check detected an unrecognized DIMM %s due to an invalid vendor identifier %s, expected %s. No further testing performed on this DIMM.",
    "The quick health check detected an unrecognized DIMM %s due to an invalid manufacturer %s, expected %s. No further testing performed on this DIMM.",
    "The quick health check detected an unrecognized DIMM %s due to an invalid model number %s, expected %s. No further testing performed on this DIMM.",
    "The quick health check detected that DIMM %s is reporting a bad health state %s, expected %s.",
    "The quick health check detected that DIMM %s is reporting a media temperature of %s C which is above the alarm threshold %s C.",
    "The quick health check detected that DIMM %s is reporting remaining spare capacity at %s%% which is less than the alarm threshold %s%%.",
    "The quick health check detected that DIMM %s is reporting percentage used at %s%% which is above the alarm threshold %s%%.",
    "The quick health check detected that DIMM %s is reporting %s uncorrectable media errors.",
    "The quick health check detected that DIMM %s is reporting %s corrected media errors.",
    "The quick health check detected that DIMM %s is reporting %s Erasure Coded Corrected media errors.",
    "The quick health check detected that DIMM %s is reporting a controller temperature of %s C which is above the alarm threshold %s C.",
    "The quick health check detected that power is limited on socket %s.",
    "The quick health check detected that the boot status register of DIMM %s is not readable.",
    "The quick health check detected that the firmware on DIMM %s is reporting that the media is not ready.",
    "The quick health check detected that the firmware on DIMM %s is reporting an error in the media.",
    "The quick health check detected that the firmware on DIMM %s is reporting that the DDRT I/O Initialization has not completed.",
    "The quick health check detected that the firmware on DIMM %s is reporting an error initializing DDRT I/O.",
    "The quick health check detected that the firmware on DIMM %s is reporting that the mailbox interface is not ready.",
    "The quick health check detected that DIMM %s failed to initialize BIOS POST testing.",
    "The quick health check detected that the firmware on DIMM %s has not initialized successfully, the last known Major:Minor Checkpoint is %s.",
    "The quick health check detected that the firmware on DIMM %s reported an assert.",
    "The quick health check detected that the firmware on DIMM %s has stalled the media interface engine.",
    "The quick health check detected that DIMM %s is reporting a viral state.",
    "The quick health check detected that the underlying software is missing or incompatible with this version of the management software.",
    "The quick health check detected that DIMM %s is not manageable by this version of the management software.",
    "The quick health check logged an unknown error code %d.",
];

const DIAG_PLATFORM_CONFIG_MESSAGES: &[&str] = &[
    "The platform configuration check succeeded.",
    "The platform configuration check detected that there are no DIMMs.",
    "The platform configuration check detected that the NFIT table is invalid.",
    "The platform configuration check detected that the platform capability table is invalid.",
    "The platform configuration check detected that the platform configuration data is invalid for DIMM %s.",
    "The platform configuration check detected that the current configuration table is invalid for DIMM %s.",
    "The platform configuration check detected that DIMM %s is unconfigured.",
    "The platform configuration check detected that interleave set %s is broken, due to a missing DIMM with serial number %s.",
    "The platform configuration check detected that the BIOS reported mapped %s capacity %s doesn't match the driver reported capacity %s.",
    "The platform configuration check detected interleave set %s has an inter-memory controller interleave size of %s.",
    "The platform configuration check detected interleave set %s has an inter-channel interleave size of %s.",
    "The platform configuration check detected that interleave set %s is interleaved across %s DIMMs, less than the recommended %s.",
    "The platform configuration check detected that DIMM %s has a goal configuration that has not yet been applied.",
    "The platform configuration check detected that the capacity of App Direct namespace %s is smaller than the capacity of its containing extent.",
    "The platform configuration check detected that pool %s contains empty App Direct capacity.",
    "The platform configuration check detected that pool %s contains empty Storage capacity.",
    "The platform configuration check detected that DIMMs on socket %s are arranged in an unbalanced configuration.",
    "The platform configuration check detected that manageable DIMMs on socket %s have different capacities.",
    "The platform configuration check detected that the DIMM security capability SKUs are inconsistent within the system.",
    "The platform configuration check detected that the DIMM mode capability SKUs are inconsistent within the system.",
    "The platform configuration check detected that the DIMMs die sparing capability SKUs are inconsistent within the system.",
    "The platform configuration check detected that a DIMM with physical ID %s is present in the system but failed to initialize.",
    "The platform configuration check detected that DIMM %s is currently configured with %s capacity which is in violation of the system supported capabilities.",
    "The platform configuration check detected that DIMM %s has a configuration goal request for %s capacity which will be in violation of the system supported capabilities.",
    "The platform configuration check was unable to retrieve the pool information.",
    "The platform configuration check was unable to retrieve the namespace information.",
    "The platform configuration check logged an unknown error code %d.",
];

const DIAG_PM_META_MESSAGES: &[&str] = &[
    "The PM Metadata check detected no namespace health issues.",
    "The PM Metadata check detected that a namespace is missing.",
    "The PM Metadata check detected that the number of labels for the namespace does not match the nlabel count in the first label.",
    "The PM Metadata check detected more than one App Direct namespace for a given interleave set.",
    "The PM Metadata check detected that the nlabel or lbasize fields in the Namespace Labels do not all have the same values.",
    "The PM Metadata check detected the namespace contains an unsupported logical block size.",
    "The PM Metadata check detected that the BTT metadata checks fail.",
    "The PM Metadata check detected no label area health issues.",
    "The PM Metadata check was unable to retrieve Platform Configuration Data from the DIMM.",
    "The PM Metadata check detected no valid Namespace Index Blocks or an uninitialized label area in the Platform Configuration Data.",
    "The PM Metadata check detected a Storage Namespace described in the Platform Configuration Data is bigger than the DIMM's available persistent memory.",
    "The PM Metadata check detected Namespace Labels overlapping each other.",
    "The PM Metadata check logged an unknown error code %d.",
];

const DIAG_SECURITY_MESSAGES: &[&str] = &[
    "The security check succeeded.",
    "The security check detected that there are no DIMMs.",
    "The security check detected that security settings are inconsistent. %s.",
    "The security check detected that security is disabled on all DIMMs.",
    "The security check detected that security is not supported on all DIMMs.",
    "The security check logged an unknown error code %d.",
];

const DIAG_FW_CONSISTENCY_MESSAGES: &[&str] = &[
    "The firmware consistency and settings check succeeded.",
    "The firmware consistency and settings check detected that there are no DIMMs.",
    "The firmware consistency and settings check detected that firmware version on DIMMs %s with model number %s is non-optimal, preferred version is %s",
    "The firmware consistency and settings check detected that DIMM %s is reporting a media temperature threshold of %s C which is above the recommended threshold %s C.",
    "The firmware consistency and settings check detected that DIMM %s is reporting a controller temperature threshold of %s C which is above the recommended threshold %s C.",
    "The firmware consistency and settings check detected that DIMM %s is reporting a spare capacity threshold of %s%% which is below the recommended threshold %s%%.",
    "The firmware consistency and settings check detected that DIMM %s is reporting a firmware log level of %s, default log level is %s.",
    "The firmware consistency and settings check detected that DIMM %s is %s the system time by %s seconds.",
    "The firmware consistency and settings check detected that DIMM %s is reporting that power management policy is not set in accordance with best practice, due to field '%s'. Valid range is %s.",
    "The firmware consistency and settings check detected that DIMM %s is reporting that die sparing policy is not set in accordance with best practice, due to field '%s'. Valid range is %s.",
    "The firmware consistency and settings check logged an unknown error code %d.",
];

fn table_for(event_type: EventType) -> Option<(u16, &'static [&'static str])> {
    match event_type {
        EventType::Config => Some((CODE_OFFSET_CONFIG, CONFIG_MESSAGES)),
        EventType::Health => Some((CODE_OFFSET_HEALTH, HEALTH_MESSAGES)),
        EventType::Mgmt => Some((CODE_OFFSET_MGMT, MGMT_MESSAGES)),
        EventType::DiagQuick => Some((CODE_OFFSET_DIAG_QUICK, DIAG_QUICK_MESSAGES)),
        EventType::DiagPlatformConfig => Some((
            CODE_OFFSET_DIAG_PLATFORM_CONFIG,
            DIAG_PLATFORM_CONFIG_MESSAGES,
        )),
        EventType::DiagPmMeta => Some((CODE_OFFSET_DIAG_PM_META, DIAG_PM_META_MESSAGES)),
        EventType::DiagSecurity => Some((CODE_OFFSET_DIAG_SECURITY, DIAG_SECURITY_MESSAGES)),
        EventType::DiagFwConsistency => Some((
            CODE_OFFSET_DIAG_FW_CONSISTENCY,
            DIAG_FW_CONSISTENCY_MESSAGES,
        )),
        EventType::All | EventType::Diag => None,
    }
}

/// The "unknown" sentinel code of `event_type`.
pub fn unknown_code(event_type: EventType) -> Option<u16> {
    table_for(event_type).map(|(offset, table)| offset + table.len() as u16 - 1)
}

/// Template for `(type, code)` and whether the code is known.
pub fn template(event_type: EventType, code: u16) -> Option<(&'static str, bool)> {
    let (offset, table) = table_for(event_type)?;
    let last = table.len() - 1;
    match code.checked_sub(offset).map(usize::from) {
        Some(index) if index < last => Some((table[index], true)),
        _ => Some((table[last], false)),
    }
}

/// Expand `%s` with `args` in order, `%d` with `code`, `%%` with `%`.
/// Missing arguments render as empty text.
fn expand(template: &str, args: &[String], code: u16) -> String {
    let mut out = String::with_capacity(template.len() + 32);
    let mut args = args.iter();
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('s') => {
                chars.next();
                if let Some(arg) = args.next() {
                    out.push_str(arg);
                }
            }
            Some('d') => {
                chars.next();
                out.push_str(&code.to_string());
            }
            Some('%') => {
                chars.next();
                out.push('%');
            }
            _ => out.push('%'),
        }
    }
    out
}

/// Human-readable message for `event`.
pub fn render(event: &Event) -> String {
    match template(event.event_type, event.code) {
        Some((text, true)) => expand(text, &event.args, event.code),
        Some((text, false)) => expand(text, &[], event.code),
        None => format!("Event code {} of type {}.", event.code, event.event_type.name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types::EventSeverity;

    #[test]
    fn test_known_code_substitutes_args() {
        let event = Event::new(EventType::Mgmt, EventSeverity::Info, MGMT_NAMESPACE_CREATED)
            .with_args(["ns0", "abcd"]);
        assert_eq!(
            render(&event),
            "A new namespace has been created. (Name: ns0, UID: abcd)"
        );
    }

    #[test]
    fn test_out_of_range_code_uses_unknown_template() {
        let event = Event::new(EventType::Mgmt, EventSeverity::Info, 399);
        assert_eq!(
            render(&event),
            "The management software logged an unknown event code 399."
        );

        let below = Event::new(EventType::DiagSecurity, EventSeverity::Warn, 12);
        assert_eq!(
            render(&below),
            "The security check logged an unknown error code 12."
        );
    }

    #[test]
    fn test_unknown_sentinels_follow_tables() {
        assert_eq!(unknown_code(EventType::Mgmt), Some(311));
        assert_eq!(unknown_code(EventType::DiagSecurity), Some(805));
        assert_eq!(unknown_code(EventType::All), None);
        assert_eq!(
            template(EventType::Mgmt, 311),
            Some((MGMT_MESSAGES[11], false))
        );
    }

    #[test]
    fn test_percent_escapes() {
        let event = Event::new(EventType::Health, EventSeverity::Warn, 200)
            .with_args(["d1", "95", "90"]);
        assert!(render(&event).ends_with("at 95% which is above the alarm threshold 90%."));
    }
}
