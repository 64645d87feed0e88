use std::fmt;
use std::str::FromStr;

pub const TURN_ON: &str = "turnon";
pub const TURN_OFF: &str = "turnoff";
pub const LEARN: &str = "learn";
pub const DIM: &str = "dim";

/// The canonical method vocabulary understood by telldusd.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    TurnOn,
    TurnOff,
    Learn,
    Dim,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TurnOn => TURN_ON,
            Self::TurnOff => TURN_OFF,
            Self::Learn => LEARN,
            Self::Dim => DIM,
        }
    }

    /// Name of the telldusd client function implementing this method.
    pub fn daemon_function(self) -> &'static str {
        match self {
            Self::TurnOn => "tdTurnOn",
            Self::TurnOff => "tdTurnOff",
            Self::Learn => "tdLearn",
            Self::Dim => "tdDim",
        }
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            TURN_ON => Ok(Self::TurnOn),
            TURN_OFF => Ok(Self::TurnOff),
            LEARN => Ok(Self::Learn),
            DIM => Ok(Self::Dim),
            other => Err(format!("unknown method '{other}'")),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configured on/off aliases, applied toward the broker and optionally back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodMapper {
    turn_on: String,
    turn_off: String,
    reverse_on_incoming: bool,
}

impl MethodMapper {
    pub fn new(
        turn_on: impl Into<String>,
        turn_off: impl Into<String>,
        reverse_on_incoming: bool,
    ) -> Self {
        Self {
            turn_on: turn_on.into(),
            turn_off: turn_off.into(),
            reverse_on_incoming,
        }
    }

    /// Device to broker: canonical on/off becomes the configured alias.
    pub fn to_broker<'a>(&'a self, method: &'a str) -> &'a str {
        if !self.turn_on.is_empty() && method == TURN_ON {
            &self.turn_on
        } else if !self.turn_off.is_empty() && method == TURN_OFF {
            &self.turn_off
        } else {
            method
        }
    }

    /// Broker to device: an alias becomes canonical, when reverse mapping is enabled.
    pub fn from_broker<'a>(&self, method: &'a str) -> &'a str {
        if !self.reverse_on_incoming {
            return method;
        }
        if !self.turn_on.is_empty() && method == self.turn_on {
            TURN_ON
        } else if !self.turn_off.is_empty() && method == self.turn_off {
            TURN_OFF
        } else {
            method
        }
    }
}
