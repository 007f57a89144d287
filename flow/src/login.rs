//! Household session probe.

use cartpilot_core::error::CopilotError;
use cartpilot_core::port::{FindOptions, Interactor};
use cartpilot_core::types::LoginState;
use cartpilot_registry::{try_resolve, Registry};
use std::time::Duration;

const ACCOUNT_PAGE: &str = "account";
const PROBE_TIMEOUT: Duration = Duration::from_millis(2_000);

/// Probe whether a household session is active.
///
/// The account-menu chain only matches for logged-in sessions; when it
/// resolves, the display name is read from the account-name chain on a
/// best-effort basis.
///
/// # Errors
///
/// Propagates registry misses; a quiet page is a valid logged-out result,
/// not an error.
pub async fn probe_login<I: Interactor>(
    interactor: &I,
    registry: &Registry,
) -> Result<LoginState, CopilotError> {
    let menu = try_resolve(
        interactor,
        registry,
        ACCOUNT_PAGE,
        "account-menu",
        FindOptions::visible_within(PROBE_TIMEOUT),
    )
    .await
    .map_err(CopilotError::from)?;

    if menu.is_none() {
        return Ok(LoginState {
            is_logged_in: false,
            username: None,
        });
    }

    let username = match try_resolve(
        interactor,
        registry,
        ACCOUNT_PAGE,
        "account-name",
        FindOptions::visible_within(Duration::from_millis(500)),
    )
    .await
    {
        Ok(Some(name)) => interactor
            .text_content(&name.handle)
            .await
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty()),
        _ => None,
    };

    Ok(LoginState {
        is_logged_in: true,
        username,
    })
}
