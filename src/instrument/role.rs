use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// Telescope vocabulary
const TEL_PROPERTIES: &[&str] = &["TEL", "TASK", "TYPE", "CCD_TRIGGER", "MOVING"];

/// CCD camera vocabulary
const CCD_PROPERTIES: &[&str] = &["CCD", "TASK", "TYPE", "CCD_TRIGGER", "MOVING"];

/// Sync service vocabulary
const SYNC_PROPERTIES: &[&str] = &[
    "SYNC", "EXPTIME", "NEXP", "BFNAME", "INDEX", "TELSTART", "CAMSTART", "OBSERVER", "RA", "DEC",
    "EPOCH", "FILTER", "TASK",
];

/// Busy-state values that mean the role is free
const IDLE_STATES: &[&str] = &["OFFLINE", "IDLE", "DISABLED"];

/// Name and closed property set of one remote subsystem
#[derive(Debug)]
pub struct RoleDescriptor {
    pub name: &'static str,
    pub whitelist: &'static [&'static str],
}

static TELESCOPE: RoleDescriptor = RoleDescriptor {
    name: "TEL",
    whitelist: TEL_PROPERTIES,
};

static CCD: RoleDescriptor = RoleDescriptor {
    name: "CCD",
    whitelist: CCD_PROPERTIES,
};

static SYNC: RoleDescriptor = RoleDescriptor {
    name: "SYNC",
    whitelist: SYNC_PROPERTIES,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Role {
    Telescope,
    Ccd,
    Sync,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Telescope, Role::Ccd, Role::Sync];

    pub fn descriptor(self) -> &'static RoleDescriptor {
        match self {
            Role::Telescope => &TELESCOPE,
            Role::Ccd => &CCD,
            Role::Sync => &SYNC,
        }
    }

    /// Wire name, also the pseudo-property reporting busy state
    pub fn name(self) -> &'static str {
        self.descriptor().name
    }

    pub fn accepts(self, property: &str) -> bool {
        self.descriptor().whitelist.contains(&property)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TEL" | "TELESCOPE" => Ok(Role::Telescope),
            "CCD" | "CAMERA" => Ok(Role::Ccd),
            "SYNC" => Ok(Role::Sync),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// Whether a connection only reads state or drives the instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Mode {
    Status,
    Control,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Status => "status",
            Mode::Control => "control",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "status" => Ok(Mode::Status),
            "control" => Ok(Mode::Control),
            other => Err(format!("unknown mode: {}", other)),
        }
    }
}

/// Directory key of one role/mode pair, e.g. `TELstatus`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoleKey {
    pub role: Role,
    pub mode: Mode,
}

impl RoleKey {
    pub fn new(role: Role, mode: Mode) -> Self {
        Self { role, mode }
    }

    pub fn parse(key: &str) -> Option<Self> {
        Role::ALL.into_iter().find_map(|role| {
            let mode = key.strip_prefix(role.name())?.parse::<Mode>().ok()?;
            Some(Self { role, mode })
        })
    }
}

impl fmt::Display for RoleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.role.name(), self.mode.as_str())
    }
}

/// Interpret a busy-state value. Anything unrecognized counts as busy.
pub fn is_busy_state(value: &str) -> bool {
    !IDLE_STATES.contains(&value.trim())
}
