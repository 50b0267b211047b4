//! Property-Based Tests for the WSL launcher
//!
//! These tests verify:
//! - Pipe names are always valid file names
//! - Status exit code mapping
//! - Mode and force mode parsing

use proptest::prelude::*;

// =============================================================================
// Pipe Naming Property Tests
// =============================================================================

use wsl_launcher::pipe::{pipe_name_from, DEFAULT_PIPE_SUFFIX, MAX_SUFFIX_LENGTH, PIPE_NAME_PREFIX};

proptest! {
    /// Any suffix yields a prefixed, non-empty name without separators or NULs
    #[test]
    fn pipe_name_is_valid_file_name(suffix in any::<String>()) {
        let name = pipe_name_from(&suffix);
        prop_assert!(name.starts_with(PIPE_NAME_PREFIX));
        prop_assert!(name.len() > PIPE_NAME_PREFIX.len());
        prop_assert!(name.len() <= 255);
        prop_assert!(!name.contains('/'));
        prop_assert!(!name.contains('\0'));
    }

    /// Short suffixes made of safe characters are kept as they are
    #[test]
    fn pipe_name_keeps_safe_suffix(suffix in "[A-Za-z0-9_.-]{1,64}") {
        prop_assert_eq!(pipe_name_from(&suffix), format!("{}{}", PIPE_NAME_PREFIX, suffix));
    }

    /// Suffixes consisting only of separators fall back to the default
    #[test]
    fn pipe_name_defaults_for_separators(suffix in "[/]{0,16}") {
        prop_assert_eq!(pipe_name_from(&suffix), format!("{}{}", PIPE_NAME_PREFIX, DEFAULT_PIPE_SUFFIX));
    }

    /// Long suffixes are cut on a char boundary, never beyond the limit
    #[test]
    fn pipe_name_truncates_long_suffix(suffix in "[a-zé]{200,400}") {
        let name = pipe_name_from(&suffix);
        let kept = &name[PIPE_NAME_PREFIX.len()..];
        prop_assert!(kept.len() <= MAX_SUFFIX_LENGTH);
        prop_assert!(suffix.starts_with(kept));
    }
}

// =============================================================================
// Status Property Tests
// =============================================================================

use wsl_launcher::status::Status;

proptest! {
    /// Installer exit codes that fit an exit status pass through unchanged
    #[test]
    fn status_keeps_small_exit_codes(code in 0i32..=255) {
        let status = Status::from_exit_code(code);
        prop_assert_eq!(status.code(), code);
        prop_assert_eq!(status.exit_code(), code);
        prop_assert_eq!(status.is_success(), code == 0);
    }

    /// Everything else maps to the generic failure exit code
    #[test]
    fn status_maps_other_codes_to_one(code in prop_oneof![i32::MIN..0, 256..=i32::MAX]) {
        let status = Status::from_exit_code(code);
        prop_assert!(!status.is_success());
        prop_assert_eq!(status.exit_code(), 1);
    }
}

#[test]
fn test_generic_statuses_are_failures() {
    for status in [Status::FAIL, Status::NOT_IMPLEMENTED, Status::UNEXPECTED] {
        assert!(!status.is_success());
        assert_eq!(status.exit_code(), 1);
    }
    assert_eq!(Status::SUCCESS.exit_code(), 0);
}

// =============================================================================
// Mode Property Tests
// =============================================================================

use wsl_launcher::config::ForceMode;
use wsl_launcher::install_state::Mode;

fn mode_strategy() -> impl Strategy<Value = Mode> {
    prop_oneof![Just(Mode::AutoDetect), Just(Mode::Text), Just(Mode::Gui)]
}

proptest! {
    /// Mode: to_string → parse round-trip is identity
    #[test]
    fn mode_roundtrip(mode in mode_strategy()) {
        let parsed: Mode = mode.to_string().parse().expect("Should parse");
        prop_assert_eq!(mode, parsed);
    }

    /// Unknown force mode values never force a mode
    #[test]
    fn force_mode_unknown_is_autodetect(value in "[^12]|[0-9a-z]{2,8}") {
        prop_assert_eq!(ForceMode::from_value(Some(&value)), ForceMode::AutoDetect);
    }
}
