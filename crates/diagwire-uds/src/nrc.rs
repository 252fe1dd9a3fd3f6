//! Negative response codes carried in `7F <sid> <nrc>` replies

use std::fmt;

macro_rules! response_codes {
    ($($(#[$doc:meta])* $variant:ident = $code:literal,)*) => {
        /// Negative response codes defined by ISO 14229-1
        ///
        /// Codes outside the table are kept verbatim in [`Unknown`](Self::Unknown).
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum NegativeResponseCode {
            $($(#[$doc])* $variant,)*
            Unknown(u8),
        }

        impl NegativeResponseCode {
            /// Wire value of this code
            pub fn code(self) -> u8 {
                match self {
                    $(Self::$variant => $code,)*
                    Self::Unknown(raw) => raw,
                }
            }

            fn name(self) -> Option<&'static str> {
                match self {
                    $(Self::$variant => Some(stringify!($variant)),)*
                    Self::Unknown(_) => None,
                }
            }
        }

        impl From<u8> for NegativeResponseCode {
            fn from(raw: u8) -> Self {
                match raw {
                    $($code => Self::$variant,)*
                    other => Self::Unknown(other),
                }
            }
        }
    };
}

response_codes! {
    GeneralReject = 0x10,
    ServiceNotSupported = 0x11,
    SubFunctionNotSupported = 0x12,
    IncorrectMessageLengthOrFormat = 0x13,
    ResponseTooLong = 0x14,
    BusyRepeatRequest = 0x21,
    ConditionsNotCorrect = 0x22,
    RequestSequenceError = 0x24,
    RequestOutOfRange = 0x31,
    SecurityAccessDenied = 0x33,
    /// Server needs more time; the final response follows
    ResponsePending = 0x78,
    ServiceNotSupportedInActiveSession = 0x7F,
}

impl From<NegativeResponseCode> for u8 {
    fn from(nrc: NegativeResponseCode) -> Self {
        nrc.code()
    }
}

impl fmt::UpperHex for NegativeResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::UpperHex::fmt(&self.code(), f)
    }
}

impl fmt::Display for NegativeResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "Unknown(0x{:02X})", self.code()),
        }
    }
}
