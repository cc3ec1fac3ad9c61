use std::time::Duration;

use anyhow::{Context, Result};
use clinicdesk_auth::AuthService;
use colored::Colorize;
use url::Url;

use crate::cli::OutputFormat;
use crate::output::{print_error, print_success, print_user};
use crate::session::AuthContext;
use crate::settings::Settings;

pub async fn login(settings: &Settings, profile: &str) -> Result<()> {
    let ctx = AuthContext::open(settings, profile, None).await?;
    ctx.bridge()
        .login()
        .await
        .context("Failed to start login")?;

    let url = ctx
        .redirect()
        .context("The provider did not return an authorization URL")?;
    println!("Open this URL in your browser to sign in:\n");
    println!("  {}\n", url.as_str().cyan());
    println!(
        "Then run: clinicdesk callback '<URL you were redirected to>' (profile: \"{profile}\")"
    );
    Ok(())
}

pub async fn callback(settings: &Settings, profile: &str, url: &str) -> Result<()> {
    let url = Url::parse(url).context("Invalid callback URL")?;
    if !url.query_pairs().any(|(k, _)| k == "code") {
        anyhow::bail!("Callback URL has no authorization code");
    }

    let ctx = AuthContext::open(settings, profile, Some(url)).await?;
    let bridge = ctx.bridge();
    bridge.mount().await;

    let snapshot = bridge.snapshot();
    let Some(user) = snapshot.user.filter(|_| snapshot.is_authenticated) else {
        anyhow::bail!("Login did not complete. Run `clinicdesk login` to start again");
    };

    print_success(&format!("Signed in as {}", user.display_name().cyan()));
    Ok(())
}

pub async fn whoami(settings: &Settings, profile: &str, format: OutputFormat) -> Result<()> {
    let ctx = AuthContext::open(settings, profile, None).await?;
    let bridge = ctx.bridge();
    bridge.mount().await;

    match bridge.snapshot().user {
        Some(user) => print_user(&user, ctx.token_expiry().await, format)?,
        None => print_error(&format!("Not logged in (profile: \"{profile}\")")),
    }
    Ok(())
}

pub async fn token(settings: &Settings, profile: &str, min_validity: u64) -> Result<()> {
    let ctx = AuthContext::open(settings, profile, None).await?;

    if !ctx
        .handle
        .update_token(Duration::from_secs(min_validity))
        .await
    {
        anyhow::bail!("No valid session for profile \"{profile}\". Run `clinicdesk login`");
    }

    let token = ctx
        .handle
        .get_token()
        .await
        .context("Session expired. Run `clinicdesk login`")?;
    println!("{token}");
    Ok(())
}

pub async fn logout(settings: &Settings, profile: &str) -> Result<()> {
    let ctx = AuthContext::open(settings, profile, None).await?;
    let was_authenticated = ctx.handle.is_authenticated().await;

    ctx.factory
        .destroy_instance()
        .await
        .context("Failed to log out")?;

    if was_authenticated {
        print_success("Logged out (session cleared)");
    } else {
        println!("No active session for profile \"{profile}\"");
    }

    if let Some(url) = ctx.redirect() {
        println!("To end the provider session, open:\n\n  {}", url.as_str().cyan());
    }
    Ok(())
}
