//! Event data model and filter predicates

use crate::error::{NvmError, Result};
use crate::store::EventRow;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Most arguments an event carries.
pub const MAX_EVENT_ARGS: usize = 3;
pub const MAX_EVENT_ARG_LEN: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventType {
    All = 0,
    Config = 1,
    Health = 2,
    Mgmt = 3,
    Diag = 4,
    DiagQuick = 5,
    DiagPlatformConfig = 6,
    DiagPmMeta = 7,
    DiagSecurity = 8,
    DiagFwConsistency = 9,
}

impl EventType {
    pub fn from_i64(value: i64) -> Option<Self> {
        Some(match value {
            0 => Self::All,
            1 => Self::Config,
            2 => Self::Health,
            3 => Self::Mgmt,
            4 => Self::Diag,
            5 => Self::DiagQuick,
            6 => Self::DiagPlatformConfig,
            7 => Self::DiagPmMeta,
            8 => Self::DiagSecurity,
            9 => Self::DiagFwConsistency,
            _ => return None,
        })
    }

    /// Only concrete types can be stored; `All` and `Diag` exist for filtering.
    pub fn is_storable(&self) -> bool {
        !matches!(self, Self::All | Self::Diag)
    }

    pub fn is_diagnostic(&self) -> bool {
        *self >= Self::Diag
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Config => "config",
            Self::Health => "health",
            Self::Mgmt => "mgmt",
            Self::Diag => "diag",
            Self::DiagQuick => "diag_quick",
            Self::DiagPlatformConfig => "diag_platform_config",
            Self::DiagPmMeta => "diag_pm_meta",
            Self::DiagSecurity => "diag_security",
            Self::DiagFwConsistency => "diag_fw_consistency",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventSeverity {
    Info = 2,
    Warn = 3,
    Critical = 6,
    Fatal = 7,
}

impl EventSeverity {
    pub fn from_i64(value: i64) -> Option<Self> {
        Some(match value {
            2 => Self::Info,
            3 => Self::Warn,
            6 => Self::Critical,
            7 => Self::Fatal,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Critical => "critical",
            Self::Fatal => "fatal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DiagnosticResult {
    #[default]
    Unknown = 0,
    Ok = 2,
    Warning = 3,
    Failed = 5,
    Aborted = 6,
}

impl DiagnosticResult {
    pub fn from_i64(value: i64) -> Option<Self> {
        Some(match value {
            0 => Self::Unknown,
            2 => Self::Ok,
            3 => Self::Warning,
            5 => Self::Failed,
            6 => Self::Aborted,
            _ => return None,
        })
    }
}

/// 16-byte device / pool / namespace identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Uid(pub [u8; 16]);

impl Uid {
    pub fn generate() -> Self {
        Self(*uuid::Uuid::new_v4().as_bytes())
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 16]
    }
}

impl From<uuid::Uuid> for Uid {
    fn from(id: uuid::Uuid) -> Self {
        Self(*id.as_bytes())
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl FromStr for Uid {
    type Err = NvmError;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != 32 || !s.is_ascii() {
            return Err(NvmError::InvalidParameter);
        }
        let mut bytes = [0u8; 16];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| NvmError::InvalidParameter)?;
        }
        Ok(Self(bytes))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Assigned by the store; 0 until stored.
    pub event_id: i64,
    pub event_type: EventType,
    pub severity: EventSeverity,
    pub code: u16,
    pub device_uid: Option<Uid>,
    pub action_required: bool,
    /// Unix seconds, assigned by the store.
    pub time: i64,
    pub args: Vec<String>,
    pub diag_result: DiagnosticResult,
    /// Rendered human-readable message, filled when read back.
    pub message: String,
}

impl Event {
    pub fn new(event_type: EventType, severity: EventSeverity, code: u16) -> Self {
        Self {
            event_id: 0,
            event_type,
            severity,
            code,
            device_uid: None,
            action_required: false,
            time: 0,
            args: Vec::new(),
            diag_result: DiagnosticResult::Unknown,
            message: String::new(),
        }
    }

    pub fn with_uid(mut self, uid: Uid) -> Self {
        self.device_uid = Some(uid);
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn action_required(mut self, required: bool) -> Self {
        self.action_required = required;
        self
    }

    pub fn with_diag_result(mut self, result: DiagnosticResult) -> Self {
        self.diag_result = result;
        self
    }

    pub(crate) fn to_row(&self) -> EventRow {
        let arg = |i: usize| self.args.get(i).cloned();
        EventRow {
            id: self.event_id,
            event_type: self.event_type as i64,
            severity: self.severity as i64,
            code: self.code as i64,
            uid: self.device_uid.map(|u| u.to_string()),
            action_required: self.action_required,
            time: self.time,
            arg1: arg(0),
            arg2: arg(1),
            arg3: arg(2),
            diag_result: self.diag_result as i64,
        }
    }
}

impl TryFrom<EventRow> for Event {
    type Error = NvmError;

    fn try_from(row: EventRow) -> Result<Self> {
        let event_type = EventType::from_i64(row.event_type).ok_or(NvmError::Unknown)?;
        let severity = EventSeverity::from_i64(row.severity).ok_or(NvmError::Unknown)?;
        let code = u16::try_from(row.code).map_err(|_| NvmError::Unknown)?;
        let device_uid = match row.uid.as_deref() {
            Some(text) if !text.is_empty() => Some(text.parse()?),
            _ => None,
        };
        // args are positional; a gap ends the list
        let args = [row.arg1, row.arg2, row.arg3]
            .into_iter()
            .map_while(|a| a)
            .collect();

        Ok(Self {
            event_id: row.id,
            event_type,
            severity,
            code,
            device_uid,
            action_required: row.action_required,
            time: row.time,
            args,
            diag_result: DiagnosticResult::from_i64(row.diag_result).unwrap_or_default(),
            message: String::new(),
        })
    }
}

/// One filter predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    /// `All` matches everything, `Diag` matches every diagnostic type.
    Type(EventType),
    /// Severity at least this.
    Severity(EventSeverity),
    Code(u16),
    DeviceUid(Uid),
    /// Strictly after this time.
    After(i64),
    /// Strictly before this time.
    Before(i64),
    EventId(i64),
    ActionRequired(bool),
}

impl Predicate {
    pub fn matches(&self, event: &Event) -> bool {
        match *self {
            Predicate::Type(EventType::All) => true,
            Predicate::Type(EventType::Diag) => event.event_type.is_diagnostic(),
            Predicate::Type(t) => event.event_type == t,
            Predicate::Severity(s) => event.severity >= s,
            Predicate::Code(c) => event.code == c,
            Predicate::DeviceUid(uid) => event.device_uid == Some(uid),
            Predicate::After(t) => event.time > t,
            Predicate::Before(t) => event.time < t,
            Predicate::EventId(id) => event.event_id == id,
            Predicate::ActionRequired(ar) => event.action_required == ar,
        }
    }
}

/// Conjunction of predicates. The empty filter matches every event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    predicates: Vec<Predicate>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self::default()
    }

    pub fn with(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn event_type(self, event_type: EventType) -> Self {
        self.with(Predicate::Type(event_type))
    }

    pub fn min_severity(self, severity: EventSeverity) -> Self {
        self.with(Predicate::Severity(severity))
    }

    pub fn code(self, code: u16) -> Self {
        self.with(Predicate::Code(code))
    }

    pub fn device_uid(self, uid: Uid) -> Self {
        self.with(Predicate::DeviceUid(uid))
    }

    pub fn after(self, time: i64) -> Self {
        self.with(Predicate::After(time))
    }

    pub fn before(self, time: i64) -> Self {
        self.with(Predicate::Before(time))
    }

    pub fn event_id(self, id: i64) -> Self {
        self.with(Predicate::EventId(id))
    }

    pub fn action_required(self, required: bool) -> Self {
        self.with(Predicate::ActionRequired(required))
    }

    /// Filter matching exactly the events both filters match.
    pub fn and(mut self, other: &EventFilter) -> Self {
        self.predicates.extend_from_slice(&other.predicates);
        self
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.predicates.iter().all(|p| p.matches(event))
    }
}
