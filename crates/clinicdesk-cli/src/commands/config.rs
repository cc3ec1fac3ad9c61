use std::time::Duration;

use anyhow::Result;
use colored::Colorize;

use crate::cli::OutputFormat;
use crate::output::{print_fields, print_json};
use crate::settings::{self, Settings};

pub fn show(settings: &Settings, profile: &str, format: OutputFormat) -> Result<()> {
    let auth = &settings.auth;
    let session_file = settings::session_path(profile)?;

    if format == OutputFormat::Json {
        return print_json(settings);
    }

    println!("{}: {}", "Profile".cyan(), profile);
    println!("{}: {}", "Session file".cyan(), session_file.display());

    let extra = auth
        .extra_params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    print_fields(&[
        ("Issuer", auth.issuer.clone()),
        ("Client ID", auth.client_id.clone()),
        ("Redirect URI", auth.redirect_uri.clone()),
        ("Post-logout URI", auth.post_logout_redirect().to_string()),
        ("Scope", auth.scope.clone()),
        ("Response type", auth.response_type.clone()),
        ("Extra params", if extra.is_empty() { "-".into() } else { extra }),
        ("Roles claim", auth.roles_claim.clone()),
        ("Clock tolerance", secs(auth.clock_tolerance)),
        ("Request timeout", secs(auth.request_timeout)),
        ("Discovery TTL", secs(auth.discovery_ttl)),
    ]);
    Ok(())
}

fn secs(duration: Duration) -> String {
    format!("{}s", duration.as_secs())
}
