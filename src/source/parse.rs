//! Parsing of native discovery strings
//!
//! The native library reports sources as `NAME (MACHINE_INFO)`. The
//! machine info may carry a dotted-quad address, in which case the source
//! is assumed to listen on the default port.

use regex::Regex;
use std::sync::LazyLock;
use tokio::time::Instant;

use crate::constants::DEFAULT_SOURCE_PORT;
use crate::source::record::{SourceKind, SourceRecord};

static DISPLAY_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+?)\s*\(([^)]+)\)$").expect("DISPLAY_NAME_RE should compile")
});
static IPV4_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})\b").expect("IPV4_RE should compile")
});
static HOSTNAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9.\-]*$").expect("HOSTNAME_RE should compile")
});

/// Machine name used when the display string has no `(MACHINE)` suffix
pub const UNKNOWN_MACHINE: &str = "unknown";

/// Split `NAME (MACHINE_INFO)` into its parts.
/// Anything else is taken whole as the name, with an unknown machine.
pub fn parse_display_name(display: &str) -> (String, String) {
    let trimmed = display.trim();
    match DISPLAY_NAME_RE.captures(trimmed) {
        Some(caps) if !caps[2].trim().is_empty() => {
            (caps[1].trim().to_string(), caps[2].trim().to_string())
        }
        _ => (trimmed.to_string(), UNKNOWN_MACHINE.to_string()),
    }
}

/// Derive a connect address from machine info.
///
/// A dotted quad wins (`ip:5960`); a bare host name gets the default port;
/// anything else is passed through verbatim.
pub fn address_from_machine_info(machine_info: &str) -> String {
    if let Some(ip) = IPV4_RE.captures(machine_info).map(|c| c[1].to_string()) {
        if ip.parse::<std::net::Ipv4Addr>().is_ok() {
            return format!("{}:{}", ip, DEFAULT_SOURCE_PORT);
        }
    }
    if machine_info != UNKNOWN_MACHINE && HOSTNAME_RE.is_match(machine_info) {
        return format!("{}:{}", machine_info, DEFAULT_SOURCE_PORT);
    }
    machine_info.to_string()
}

/// Case-insensitive `hx3` / `hx2` markers, Standard otherwise.
/// OBS outputs only say `hx` and are taken as HX2.
pub fn kind_from_name(display: &str) -> SourceKind {
    let lower = display.to_lowercase();
    if lower.contains("hx3") {
        SourceKind::CompressedHx3
    } else if lower.contains("hx2") || (lower.contains("obs") && lower.contains("hx")) {
        SourceKind::CompressedHx2
    } else {
        SourceKind::Standard
    }
}

/// Build a record from one native discovery string
pub fn record_from_display_name(display: &str, now: Instant) -> SourceRecord {
    let (name, machine) = parse_display_name(display);
    let address = address_from_machine_info(&machine);
    SourceRecord::new(name, machine, address, kind_from_name(display), now)
        .with_description("Found by native discovery")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_well_formed() {
        assert_eq!(
            parse_display_name("OBS PGM (STUDIO-PC)"),
            ("OBS PGM".to_string(), "STUDIO-PC".to_string())
        );
        // Nested parentheses are not machine info
        assert_eq!(
            parse_display_name("Cam 1 (Studio (B))"),
            ("Cam 1 (Studio (B))".to_string(), "unknown".to_string())
        );
    }

    #[test]
    fn test_parse_unparsable() {
        assert_eq!(
            parse_display_name("JUST A NAME"),
            ("JUST A NAME".to_string(), "unknown".to_string())
        );
        assert_eq!(
            parse_display_name("Trailing (open"),
            ("Trailing (open".to_string(), "unknown".to_string())
        );
    }

    #[test]
    fn test_address_from_machine_info() {
        assert_eq!(address_from_machine_info("STUDIO 192.168.1.21"), "192.168.1.21:5960");
        assert_eq!(address_from_machine_info("host1"), "host1:5960");
        assert_eq!(address_from_machine_info("Studio PC"), "Studio PC");
        assert_eq!(address_from_machine_info("unknown"), "unknown");
        // Not a valid IPv4 address, but a plausible host label
        assert_eq!(address_from_machine_info("999.1.1.1"), "999.1.1.1:5960");
    }

    #[test]
    fn test_kind_from_name() {
        assert_eq!(kind_from_name("Camera HX3 (BOX)"), SourceKind::CompressedHx3);
        assert_eq!(kind_from_name("phone hx2 (IPHONE)"), SourceKind::CompressedHx2);
        assert_eq!(kind_from_name("OBS (PC)"), SourceKind::Standard);
        assert_eq!(kind_from_name("OBS HX Out (PC)"), SourceKind::CompressedHx2);
    }

    #[test]
    fn test_record_from_display_name() {
        let r = record_from_display_name("A (host1)", Instant::now());
        assert_eq!(r.name, "A");
        assert_eq!(r.machine_name, "host1");
        assert_eq!(r.address, "host1:5960");
        assert_eq!(r.kind, SourceKind::Standard);
        assert!(r.is_online);
    }

    proptest! {
        #[test]
        fn prop_parse_never_loses_name(s in "\\PC{0,40}") {
            let (name, machine) = parse_display_name(&s);
            prop_assert!(!machine.is_empty());
            prop_assert!(s.trim().starts_with(name.as_str()));
        }

        #[test]
        fn prop_parse_roundtrips_formatted(
            name in "[A-Za-z0-9 ]{0,16}[A-Za-z0-9]",
            machine in "[A-Za-z0-9.\\-]{1,16}",
        ) {
            let display = format!("{} ({})", name, machine);
            let (n, m) = parse_display_name(&display);
            prop_assert_eq!(n, name.trim().to_string());
            prop_assert_eq!(m, machine);
        }
    }
}
