// crates/cstp-config/tests/load_validation.rs
// ============================================================================
// Module: Config Load Tests
// Description: File loading, token expansion, and validation failures.
// Purpose: Exercise the full load path against real files.
// Dependencies: cstp-config, tempfile
// ============================================================================

//! File-backed configuration loading: a missing file yields defaults, a
//! populated file round-trips its sections, and invalid values fail with
//! field-naming errors.

use std::io::Write;

use cstp_config::Config;
use cstp_config::ConfigError;

#[test]
fn missing_file_loads_defaults() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let config = Config::load(&dir.path().join("absent.yaml"))?;
    assert_eq!(config.server.port, 8_100);
    assert_eq!(config.storage.backend, "yaml");
    Ok(())
}

#[test]
fn populated_file_round_trips_sections() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("server.yaml");
    let mut file = std::fs::File::create(&path)?;
    writeln!(
        file,
        "server:\n  host: 127.0.0.1\n  port: 9100\nagent:\n  name: test-agent\n  contact: ops@example.com\nauth:\n  enabled: true\n  tokens:\n    - agent: claude\n      token: literal-token\ntracker:\n  session_ttl_minutes: 20\nstorage:\n  backend: memory\n"
    )?;

    let config = Config::load(&path)?;
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 9_100);
    assert_eq!(config.agent.contact.as_deref(), Some("ops@example.com"));
    assert_eq!(config.auth.tokens.len(), 1);
    assert_eq!(config.auth.tokens[0].token, "literal-token");
    assert_eq!(config.tracker.session_ttl_seconds, 1_200);
    assert!(config.warnings.iter().any(|w| w.contains("deprecated")));
    Ok(())
}

#[test]
fn invalid_backend_fails_validation_with_field_name() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("server.yaml");
    std::fs::write(&path, "storage:\n  backend: postgres\n")?;

    let error = Config::load(&path);
    let Err(ConfigError::Invalid(message)) = error else {
        return Err("expected a validation error".into());
    };
    assert!(message.contains("storage.backend"));
    Ok(())
}

#[test]
fn zero_ttl_fails_validation() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("server.yaml");
    std::fs::write(&path, "tracker:\n  input_ttl_seconds: 0\n")?;

    let error = Config::load(&path);
    let Err(ConfigError::Invalid(message)) = error else {
        return Err("expected a validation error".into());
    };
    assert!(message.contains("tracker.input_ttl_seconds"));
    Ok(())
}
