use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clinicdesk_auth::AuthConfig;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

/// Config file read when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "clinicdesk.toml";

/// Everything the CLI reads from `clinicdesk.toml` and `CLINICDESK__*`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub auth: AuthConfig,
}

/// Loads settings from `path` (or `./clinicdesk.toml` when present), then
/// applies environment overrides such as `CLINICDESK__AUTH__ISSUER`.
pub fn load(path: Option<&Path>) -> Result<Settings> {
    let mut builder = Config::builder();
    match path {
        Some(p) => {
            if !p.exists() {
                anyhow::bail!("Config file not found: {}", p.display());
            }
            builder = builder.add_source(File::from(p.to_path_buf()));
        }
        None => {
            let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
            if default_path.exists() {
                builder = builder.add_source(File::from(default_path));
            }
        }
    }
    builder = builder.add_source(
        Environment::with_prefix("CLINICDESK")
            .try_parsing(true)
            .separator("__"),
    );

    let settings: Settings = builder
        .build()
        .context("Failed to read configuration")?
        .try_deserialize()
        .context("Failed to parse configuration")?;

    settings.auth.validate().context(
        "Invalid auth configuration. Set [auth] issuer, client_id and redirect_uri in clinicdesk.toml",
    )?;
    Ok(settings)
}

/// Session file for `profile` under `~/.clinicdesk/`.
pub fn session_path(profile: &str) -> Result<PathBuf> {
    let home = dirs::home_dir().context("Cannot determine home directory")?;
    session_path_in(&home.join(".clinicdesk"), profile)
}

fn session_path_in(dir: &Path, profile: &str) -> Result<PathBuf> {
    let valid = !profile.is_empty()
        && profile
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        anyhow::bail!(
            "Invalid profile name \"{profile}\": use letters, digits, '-' or '_'"
        );
    }
    Ok(dir.join(format!("session.{profile}.json")))
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[auth]
issuer = "https://idp.clinic.test/realms/clinic"
client_id = "clinicdesk"
redirect_uri = "https://clinic.test/callback"
clock_tolerance = "2m"

[auth.extra_params]
kc_idp_hint = "google"
prompt = "login"
"#
        )
        .unwrap();

        let settings = load(Some(file.path())).unwrap();
        assert_eq!(settings.auth.client_id, "clinicdesk");
        assert_eq!(settings.auth.clock_tolerance, Duration::from_secs(120));
        assert_eq!(settings.auth.scope, "openid profile email");
        let keys: Vec<_> = settings.auth.extra_params.keys().cloned().collect();
        assert_eq!(keys, vec!["kc_idp_hint", "prompt"]);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_incomplete_config_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[auth]\nclient_id = \"clinicdesk\"").unwrap();
        assert!(load(Some(file.path())).is_err());
    }

    #[test]
    fn test_session_path_per_profile() {
        let dir = Path::new("/home/test/.clinicdesk");
        assert_eq!(
            session_path_in(dir, "staging").unwrap(),
            dir.join("session.staging.json")
        );
        assert!(session_path_in(dir, "../etc").is_err());
        assert!(session_path_in(dir, "").is_err());
    }
}
