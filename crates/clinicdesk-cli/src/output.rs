use anyhow::Result;
use clinicdesk_auth::AuthUser;
use colored::Colorize;
use serde::Serialize;
use tabled::builder::Builder;
use tabled::settings::Style;

use crate::cli::OutputFormat;

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Two-column table of labelled values.
pub fn print_fields(rows: &[(&str, String)]) {
    let mut builder = Builder::default();
    for (label, value) in rows {
        builder.push_record([label.to_string(), value.clone()]);
    }
    println!("{}", builder.build().with(Style::rounded()));
}

/// Prints `user` without its tokens.
pub fn print_user(user: &AuthUser, expires: Option<String>, format: OutputFormat) -> Result<()> {
    let mut redacted = user.clone();
    redacted.access_token = None;
    redacted.id_token = None;

    match format {
        OutputFormat::Json => print_json(&redacted),
        OutputFormat::Table => {
            let mut roles: Vec<&str> = redacted.roles.iter().map(String::as_str).collect();
            roles.sort_unstable();

            let mut rows = vec![
                ("Subject", redacted.id.clone()),
                ("Username", redacted.username.clone()),
                ("Name", redacted.display_name()),
                ("Email", or_dash(&redacted.email)),
                ("Roles", or_dash(&roles.join(", "))),
            ];
            if let Some(expires) = expires {
                rows.push(("Token expires", expires));
            }
            print_fields(&rows);
            Ok(())
        }
    }
}

fn or_dash(value: &str) -> String {
    if value.is_empty() {
        "-".to_string()
    } else {
        value.to_string()
    }
}
