//! Firmware version parsing and finality.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;

/// A dotted number right after a `software`, `firmware` or `version` label.
static LABELED_VERSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:software|firmware|version)\b[^\d\n]*(\d+(?:\.\d+)+)")
        .expect("labeled version regex is valid")
});

/// Any complete run of dot-separated numbers.
static DOTTED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+(?:\.\d+)+").expect("dotted number regex is valid"));

/// A numeric `major.minor.patch` version.
///
/// Ordering is componentwise numeric, so `6.10.0 > 6.9.0` and
/// `2.11.11 < 6.1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FirmwareVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

/// Oldest version considered fully migrated.
pub const MIN_FINAL_VERSION: FirmwareVersion = FirmwareVersion {
    major: 6,
    minor: 1,
    patch: 0,
};

impl FirmwareVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Find the version number in free text such as
    /// `"Firmware Version: 6.1.0-r2"`. A missing patch component reads as 0.
    ///
    /// A labeled number wins over an unlabeled one. Runs of four or more
    /// components (IPv4 addresses, build ids) are never versions.
    pub fn find_in(text: &str) -> Option<Self> {
        LABELED_VERSION_RE
            .captures_iter(text)
            .find_map(|caps| Self::from_dotted(&caps[1]))
            .or_else(|| {
                DOTTED_RE
                    .find_iter(text)
                    .find_map(|m| Self::from_dotted(m.as_str()))
            })
    }

    fn from_dotted(run: &str) -> Option<Self> {
        let parts: Vec<&str> = run.split('.').collect();
        let (major, minor, patch) = match parts.as_slice() {
            [major, minor] => (major, minor, "0"),
            [major, minor, patch] => (major, minor, *patch),
            _ => return None,
        };
        Some(Self::new(
            major.parse().ok()?,
            minor.parse().ok()?,
            patch.parse().ok()?,
        ))
    }

    pub fn is_final(self) -> bool {
        self >= MIN_FINAL_VERSION
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for FirmwareVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::find_in(s).ok_or_else(|| format!("no version number in {s:?}"))
    }
}

/// Whether `version` is at or beyond [`MIN_FINAL_VERSION`].
/// Unparseable text is never final.
pub fn is_final(version: &str) -> bool {
    FirmwareVersion::find_in(version).is_some_and(FirmwareVersion::is_final)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finality_examples() {
        assert!(is_final("6.1.0"));
        assert!(is_final("6.2.0"));
        assert!(!is_final("2.11.11"));
    }

    #[test]
    fn comparison_is_numeric_not_lexical() {
        assert!(is_final("6.10.0"));
        assert!(is_final("10.0.0"));
        assert!(!is_final("6.0.99"));
        assert!(!is_final("5.99.99"));
    }

    #[test]
    fn parses_versions_embedded_in_device_output() {
        let v = FirmwareVersion::find_in("Running software: 6.1.0-1024 (active)").unwrap();
        assert_eq!(v, FirmwareVersion::new(6, 1, 0));
        assert_eq!(v.to_string(), "6.1.0");

        let v: FirmwareVersion = "6.1".parse().unwrap();
        assert_eq!(v, FirmwareVersion::new(6, 1, 0));
    }

    #[test]
    fn addresses_in_banner_are_not_versions() {
        let banner = "Device 10.249.73.67 running software: 2.11.11";
        assert_eq!(FirmwareVersion::find_in(banner), Some(FirmwareVersion::new(2, 11, 11)));
        assert!(!is_final(banner));

        let unlabeled = "mgmt 10.249.73.67/29 up, image 2.11.11";
        assert_eq!(FirmwareVersion::find_in(unlabeled), Some(FirmwareVersion::new(2, 11, 11)));

        let hw_first = "Hardware rev 7.2\nSoftware version: 2.11.11";
        assert!(!is_final(hw_first));

        assert_eq!(FirmwareVersion::find_in("10.0.0.1"), None);
    }

    #[test]
    fn garbage_is_not_final() {
        assert!(!is_final(""));
        assert!(!is_final("unknown"));
        assert!("n/a".parse::<FirmwareVersion>().is_err());
    }
}
