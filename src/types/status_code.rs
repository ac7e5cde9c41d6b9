// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Quality code attached to every observed value.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Severity mask: the two top bits of the code.
const SEVERITY_MASK: u32 = 0xC000_0000;

/// Quality of an observed value, encoded the way field devices report it.
///
/// The two most significant bits carry the severity (good, uncertain, bad);
/// the remaining bits identify the specific condition.
///
/// # Examples
///
/// ```
/// use uapub_lib::types::StatusCode;
///
/// assert!(StatusCode::GOOD.is_good());
/// assert!(StatusCode::BAD_NO_COMMUNICATION.is_bad());
/// assert_eq!(StatusCode::new(0x4000_0000), StatusCode::UNCERTAIN);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(u32);

impl StatusCode {
    /// The value is good.
    pub const GOOD: Self = Self(0);

    /// The value is uncertain.
    pub const UNCERTAIN: Self = Self(0x4000_0000);

    /// The value is bad, for an unspecified reason.
    pub const BAD: Self = Self(0x8000_0000);

    /// Communication with the data source is not possible.
    pub const BAD_NO_COMMUNICATION: Self = Self(0x8031_0000);

    /// No value has been received from the source yet.
    pub const BAD_WAITING_FOR_INITIAL_DATA: Self = Self(0x8032_0000);

    /// Creates a status code from its raw value.
    #[must_use]
    pub const fn new(code: u32) -> Self {
        Self(code)
    }

    /// Returns the raw code.
    #[must_use]
    pub const fn code(self) -> u32 {
        self.0
    }

    /// Returns `true` if the severity is good.
    #[must_use]
    pub const fn is_good(self) -> bool {
        self.0 & SEVERITY_MASK == 0
    }

    /// Returns `true` if the severity is uncertain.
    #[must_use]
    pub const fn is_uncertain(self) -> bool {
        self.0 & SEVERITY_MASK == 0x4000_0000
    }

    /// Returns `true` if the severity is bad.
    #[must_use]
    pub const fn is_bad(self) -> bool {
        self.0 & 0x8000_0000 != 0
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            f.write_str("Good")
        } else if self.is_bad() {
            write!(f, "Bad(0x{:08X})", self.0)
        } else if self.is_uncertain() {
            write!(f, "Uncertain(0x{:08X})", self.0)
        } else {
            write!(f, "Good(0x{:08X})", self.0)
        }
    }
}

impl From<u32> for StatusCode {
    fn from(code: u32) -> Self {
        Self(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_classification() {
        assert!(StatusCode::GOOD.is_good());
        assert!(!StatusCode::GOOD.is_bad());
        assert!(StatusCode::UNCERTAIN.is_uncertain());
        assert!(!StatusCode::UNCERTAIN.is_good());
        assert!(StatusCode::BAD_WAITING_FOR_INITIAL_DATA.is_bad());
    }

    #[test]
    fn display_formats() {
        assert_eq!(StatusCode::GOOD.to_string(), "Good");
        assert_eq!(StatusCode::BAD.to_string(), "Bad(0x80000000)");
        assert_eq!(StatusCode::UNCERTAIN.to_string(), "Uncertain(0x40000000)");
    }

    #[test]
    fn serializes_as_number() {
        let json = serde_json::to_string(&StatusCode::BAD_NO_COMMUNICATION).unwrap();
        assert_eq!(json, "2150694912");
    }
}
