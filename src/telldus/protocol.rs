//! telldusd socket message encoding.
//!
//! Strings travel as `<len>:<text>` and integers as `i<n>s`; a request is the
//! function name followed by its arguments, a response a single integer.

use std::fmt;

/// Numeric result reported by telldusd for a device request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultCode(pub i32);

impl ResultCode {
    pub const SUCCESS: Self = Self(0);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    pub fn message(self) -> &'static str {
        match self.0 {
            0 => "Success",
            -1 => "TellStick not found",
            -2 => "Permission denied",
            -3 => "Device not found",
            -4 => "The method you tried to use is not supported by the device",
            -5 => "An error occurred while communicating with TellStick",
            -6 => "Could not connect to the Telldus Service",
            -7 => "Received an unknown response",
            -8 => "Syntax error",
            -9 => "Broken pipe",
            -10 => "An error occurred while communicating with the Telldus Service",
            -11 => "Syntax error in the configuration file",
            _ => "Unknown error",
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.0)
    }
}

pub fn push_string(out: &mut String, value: &str) {
    out.push_str(&value.len().to_string());
    out.push(':');
    out.push_str(value);
}

pub fn push_int(out: &mut String, value: i32) {
    out.push('i');
    out.push_str(&value.to_string());
    out.push('s');
}

/// Build a request calling `function` with the given integer arguments.
pub fn request(function: &str, args: &[i32]) -> String {
    let mut out = String::new();
    push_string(&mut out, function);
    for arg in args {
        push_int(&mut out, *arg);
    }
    out
}

/// Extract the leading `i<n>s` integer from a response.
pub fn parse_int(response: &str) -> Option<i32> {
    let digits = response.trim_start().strip_prefix('i')?;
    let end = digits.find('s')?;
    digits[..end].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_encodes_function_and_args() {
        assert_eq!(request("tdTurnOn", &[5]), "8:tdTurnOni5s");
        assert_eq!(request("tdDim", &[12, 128]), "5:tdDimi12si128s");
        assert_eq!(request("tdLearn", &[-1]), "7:tdLearni-1s");
    }

    #[test]
    fn test_parse_int_reads_leading_integer() {
        assert_eq!(parse_int("i0s"), Some(0));
        assert_eq!(parse_int("i-3s"), Some(-3));
        assert_eq!(parse_int("i42s8:trailing"), Some(42));
        assert_eq!(parse_int(""), None);
        assert_eq!(parse_int("ixs"), None);
        assert_eq!(parse_int("i12"), None);
    }

    #[test]
    fn test_result_messages() {
        assert!(ResultCode(0).is_success());
        assert_eq!(ResultCode(-3).message(), "Device not found");
        assert_eq!(ResultCode(-99).message(), "Unknown error");
        assert_eq!(ResultCode(-6).to_string(), "Could not connect to the Telldus Service (-6)");
    }
}
