use anyhow::Result;
use clinicdesk_auth::{GuardDecision, Rbac, RouteGuard, Visibility};
use colored::Colorize;

use crate::cli::CheckArgs;
use crate::output::print_success;
use crate::session::AuthContext;
use crate::settings::Settings;

pub async fn check(settings: &Settings, profile: &str, args: &CheckArgs) -> Result<()> {
    let ctx = AuthContext::open(settings, profile, None).await?;
    let bridge = ctx.bridge();
    bridge.mount().await;

    let rbac = bridge.rbac();
    if !rbac.is_authenticated() {
        anyhow::bail!("Not logged in (profile: \"{profile}\")");
    }

    match &args.route {
        Some(route) => check_route(&rbac, args, route),
        None => check_roles(&rbac, args),
    }
}

fn check_roles(rbac: &Rbac, args: &CheckArgs) -> Result<()> {
    let visibility = if args.all {
        Visibility::all(&args.roles)
    } else {
        Visibility::any(&args.roles)
    };

    let wanted = describe(&args.roles, args.all);
    if visibility.is_visible(rbac) {
        print_success(&format!("Granted: holds {wanted}"));
        Ok(())
    } else {
        anyhow::bail!("Denied: does not hold {wanted} (roles: {})", held(rbac))
    }
}

fn check_route(rbac: &Rbac, args: &CheckArgs, route: &str) -> Result<()> {
    let mut guard = RouteGuard::new(&args.roles);
    if args.all {
        guard = guard.require_all();
    }
    if let Some(target) = &args.redirect_to {
        guard = guard.redirect_to(target);
    }

    match guard.check(rbac, route) {
        GuardDecision::Allow => {
            print_success(&format!("Route {} allowed", route.cyan()));
            Ok(())
        }
        GuardDecision::Redirect { to, from } => {
            anyhow::bail!(
                "Route {from} denied, redirect to {to} (requires {})",
                describe(&args.roles, args.all)
            )
        }
    }
}

fn describe(roles: &[String], all: bool) -> String {
    let joiner = if all { " and " } else { " or " };
    roles.join(joiner)
}

fn held(rbac: &Rbac) -> String {
    let roles = rbac.roles();
    if roles.is_empty() {
        "none".to_string()
    } else {
        roles.join(", ")
    }
}
