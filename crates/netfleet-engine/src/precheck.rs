//! Read-only precondition checks against live device output.
//!
//! Every check returns a [`PrecheckOutcome`]. Output that lacks the
//! expected token is an ordinary failed check, never an error.

use std::net::Ipv4Addr;

use netfleet_common::models::PrecheckOutcome;
use once_cell::sync::Lazy;
use regex::Regex;

pub const SUBNET_MASK: &str = "subnet_mask";
pub const LICENSE: &str = "license";
pub const STP: &str = "stp";

static CIDR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{1,3}(?:\.\d{1,3}){3})/(\d{1,2})\b").expect("cidr regex is valid")
});

/// Paid bundle codes recognized out of the box.
pub const DEFAULT_PAID_LICENSE_BUNDLES: &[&str] = &["WZF-CAP", "WZL-CE1", "WZL-CE2", "WZF-PTP"];

static BUNDLE_TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9]+(?:-[A-Za-z0-9]+)+").expect("bundle token regex is valid")
});

static TRIAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\btrial\b").expect("trial regex is valid"));

static STP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^.*\b(?:spanning[- ]tree|stp|rstp|mstp)\b.*?\b(enabled|disabled)\b")
        .expect("stp regex is valid")
});

/// Dotted-decimal mask for a CIDR prefix length, `None` past /32.
pub fn prefix_to_mask(prefix: u8) -> Option<Ipv4Addr> {
    if prefix > 32 {
        return None;
    }
    let bits = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    };
    Some(Ipv4Addr::from(bits))
}

/// Compare the mask of the first CIDR address in `output` to `expected_mask`.
///
/// On a match the detail is the derived mask, e.g. `255.255.255.248`.
pub fn check_subnet_mask(output: &str, expected_mask: &str) -> PrecheckOutcome {
    let Some(caps) = CIDR_RE.captures(output) else {
        return PrecheckOutcome::fail("no CIDR address in interface output");
    };
    let address = &caps[1];
    let Some(mask) = caps[2].parse::<u8>().ok().and_then(prefix_to_mask) else {
        return PrecheckOutcome::fail(format!("invalid prefix length on {address}/{}", &caps[2]));
    };

    let matches = match expected_mask.trim().parse::<Ipv4Addr>() {
        Ok(expected) => expected == mask,
        Err(_) => false,
    };
    if matches {
        PrecheckOutcome::pass(mask.to_string())
    } else {
        PrecheckOutcome::fail(format!(
            "{mask} (expected {})",
            expected_mask.trim()
        ))
    }
}

/// Decide licensing from an "installed bundles" listing.
///
/// Any recognized paid bundle code licenses the device, even next to a
/// `Trial` line. Other hyphenated tokens (serials, license keys) do not
/// count. A listing with only `Trial` is unlicensed with detail `trial`.
pub fn check_license_bundles<S: AsRef<str>>(
    output: &str,
    paid_bundles: &[S],
) -> PrecheckOutcome {
    let mut codes: Vec<String> = Vec::new();
    for m in BUNDLE_TOKEN_RE.find_iter(output) {
        let token = m.as_str().to_ascii_uppercase();
        let recognized = paid_bundles
            .iter()
            .any(|code| code.as_ref().trim().eq_ignore_ascii_case(&token));
        if recognized && !codes.contains(&token) {
            codes.push(token);
        }
    }

    if !codes.is_empty() {
        return PrecheckOutcome::pass(codes.join(", "));
    }
    if TRIAL_RE.is_match(output) {
        PrecheckOutcome::fail("trial")
    } else {
        PrecheckOutcome::fail("no license bundles installed")
    }
}

/// Compare the reported spanning-tree state to the expected one.
pub fn check_stp(output: &str, expect_enabled: bool) -> PrecheckOutcome {
    let Some(caps) = STP_RE.captures(output) else {
        return PrecheckOutcome::fail("spanning tree state not reported");
    };
    let enabled = caps[1].eq_ignore_ascii_case("enabled");
    let state = if enabled { "enabled" } else { "disabled" };
    if enabled == expect_enabled {
        PrecheckOutcome::pass(state)
    } else {
        let wanted = if expect_enabled { "enabled" } else { "disabled" };
        PrecheckOutcome::fail(format!("{state} (expected {wanted})"))
    }
}
