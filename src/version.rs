//! Revision version numbers
//!
//! A version is a `major` and a `minor` integer. Non-negative components render
//! as decimals, negative components render as the character whose code point is
//! the negated value (`-65` renders as `A`). A minor equal to
//! [`MINOR_SUPPRESSED`] is not displayed at all, which keeps "no minor version
//! yet" distinct from "minor version zero".
//!
//! The integer encoding is shared with previously stored revisions and must not
//! change.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Legacy encoding of "no minor version": the negated code point of a space.
pub const MINOR_SUPPRESSED: i32 = -(b' ' as i32);

const FIRST_LETTER: u32 = b'A' as u32;
const LAST_LETTER: u32 = b'Z' as u32;

/// Which component of a version to bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionBump {
    Minor,
    Major,
    Keep,
}

impl VersionBump {
    /// Map the integer codes stored by older clients (`1` minor, `2` major).
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => VersionBump::Minor,
            2 => VersionBump::Major,
            _ => VersionBump::Keep,
        }
    }
}

/// Major/minor version pair of a revision.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: i32,
    pub minor: i32,
}

impl Version {
    /// Version given to the first revision of a new document.
    pub const INITIAL: Version = Version { major: 0, minor: 1 };

    pub fn new(major: i32, minor: i32) -> Self {
        Self { major, minor }
    }

    /// Whether the minor component is shown in the display string.
    pub fn has_minor(&self) -> bool {
        self.minor != MINOR_SUPPRESSED
    }

    /// Apply a bump in place.
    ///
    /// A major bump resets the minor component to `0`, or to the suppressed
    /// sentinel when the major component was rendered as a letter.
    pub fn increase(&mut self, bump: VersionBump) {
        match bump {
            VersionBump::Minor => {
                self.minor = increase_component(self.minor);
            }
            VersionBump::Major => {
                self.minor = if self.major < 0 { MINOR_SUPPRESSED } else { 0 };
                self.major = increase_component(self.major);
            }
            VersionBump::Keep => {}
        }
    }

    /// Numeric ordering key, `major * 1000 + minor`, derived from the display string.
    pub fn sortable(&self) -> i64 {
        sortable_version(&self.to_string())
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", gui_version(self.major))?;
        if self.has_minor() {
            write!(f, ".{}", gui_version(self.minor))?;
        }
        Ok(())
    }
}

/// Render a single version component.
pub fn gui_version(value: i32) -> String {
    if value >= 0 {
        value.to_string()
    } else {
        char::from_u32(value.unsigned_abs())
            .map(String::from)
            .unwrap_or_default()
    }
}

/// Advance a component by one render step.
///
/// Numeric components count up. Letter components walk `A..=Z`; anything
/// below `A` (the space sentinel included) jumps to `A` and `Z` saturates.
pub fn increase_component(value: i32) -> i32 {
    if value >= 0 {
        return value.saturating_add(1);
    }
    let code = value.unsigned_abs();
    if code < FIRST_LETTER {
        -(FIRST_LETTER as i32)
    } else if code < LAST_LETTER {
        value - 1
    } else {
        log::debug!("version component {} cannot be increased further", gui_version(value));
        value
    }
}

/// Parse a display string back into `major * 1000 + minor`.
///
/// Anything other than exactly two dot-separated components yields `0`, and
/// each component contributes its leading integer (letters count as zero).
pub fn sortable_version(display: &str) -> i64 {
    let mut parts: Vec<&str> = display.split('.').collect();
    while parts.last().map_or(false, |p| p.is_empty()) {
        parts.pop();
    }
    match parts.as_slice() {
        [major, minor] => leading_integer(major) * 1000 + leading_integer(minor),
        _ => 0,
    }
}

fn leading_integer(text: &str) -> i64 {
    let text = text.trim_start();
    let (negative, digits) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let value = digits
        .bytes()
        .take_while(|b| b.is_ascii_digit())
        .fold(0i64, |acc, b| acc.saturating_mul(10).saturating_add(i64::from(b - b'0')));
    if negative {
        -value
    } else {
        value
    }
}
