//! `ithena-cli auth` subcommands.
//!
//! `login` runs the OAuth 2.0 device authorization flow against the platform
//! and stores the access token in the OS secret store. `status` and `deauth`
//! only consult the token provider.

use std::time::Duration;

use serde::Deserialize;

use ithena_core::auth::TokenProvider;

/// Platform backend base URL.
pub const BACKEND_BASE_URL: &str = "https://ithena.one";

const DEVICE_AUTH_PATH: &str = "/api/cli/auth/device";
const TOKEN_PATH: &str = "/api/cli/auth/token";
const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";
const VERIFY_URL: &str = "https://ithena.one/cli-auth/verify";

#[derive(Debug, Deserialize)]
struct DeviceAuthResponse {
    device_code: String,
    user_code: String,
    #[allow(dead_code)]
    verification_uri: Option<String>,
    expires_in: u64,
    interval: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    token_type: String,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// login
// ─────────────────────────────────────────────────────────────────────────────

/// Run the device authorization flow. Returns a process exit code.
pub async fn login(provider: &dyn TokenProvider) -> i32 {
    login_against(provider, BACKEND_BASE_URL).await
}

async fn login_against(provider: &dyn TokenProvider, base_url: &str) -> i32 {
    eprintln!("Initiating device authorization flow...");
    let client = reqwest::Client::new();

    let device: DeviceAuthResponse = match client
        .post(format!("{base_url}{DEVICE_AUTH_PATH}"))
        .header("Content-Type", "application/json")
        .send()
        .await
    {
        Ok(resp) if resp.status().is_success() => match resp.json().await {
            Ok(body) => body,
            Err(e) => {
                eprintln!("Error decoding device auth response: {e}");
                return 1;
            }
        },
        Ok(resp) => {
            eprintln!(
                "Failed to initiate device authorization. Status: {}",
                resp.status()
            );
            return 1;
        }
        Err(e) => {
            eprintln!("Error initiating device auth: {e}");
            return 1;
        }
    };

    println!("\n=== CLI Authorization Required ===");
    println!("1. Open the following URL in your browser:\n   {VERIFY_URL}");
    println!("2. Enter the following code when prompted:\n   {}\n", device.user_code);
    println!("Waiting for authorization...");

    let mut poll_interval = Duration::from_secs(device.interval.max(1));
    // A small grace window past the advertised expiry.
    let deadline =
        tokio::time::Instant::now() + Duration::from_secs(device.expires_in) + Duration::from_secs(10);

    while tokio::time::Instant::now() < deadline {
        tokio::time::sleep(poll_interval).await;

        let poll = client
            .post(format!("{base_url}{TOKEN_PATH}"))
            .json(&serde_json::json!({
                "grant_type": DEVICE_CODE_GRANT,
                "device_code": device.device_code,
            }))
            .send()
            .await;

        let resp = match poll {
            Ok(resp) => resp,
            Err(e) => {
                tracing::debug!(error = %e, "token poll failed, retrying");
                continue;
            }
        };

        if resp.status().is_success() {
            let token: TokenResponse = match resp.json().await {
                Ok(body) => body,
                Err(e) => {
                    eprintln!("\nFailed to decode token response: {e}");
                    return 1;
                }
            };
            println!("\nAuthorization successful!");

            if let Err(e) = provider.store(&token.access_token) {
                eprintln!("Warning: failed to store token securely: {e}");
                eprintln!("You may need to authenticate again later.");
            } else {
                tracing::debug!(token_type = %token.token_type, "access token stored");
            }
            println!("Authentication complete.");
            return 0;
        }

        if resp.status() == reqwest::StatusCode::BAD_REQUEST {
            let err: TokenErrorResponse = match resp.json().await {
                Ok(body) => body,
                Err(e) => {
                    tracing::debug!(error = %e, "could not decode poll error, retrying");
                    continue;
                }
            };
            match err.error.as_str() {
                "authorization_pending" => continue,
                "slow_down" => {
                    tracing::debug!("server requested slower polling");
                    poll_interval += Duration::from_secs(5);
                    continue;
                }
                "access_denied" => {
                    println!("\nAuthorization request denied by user.");
                    return 1;
                }
                "expired_token" => {
                    println!("\nAuthorization request expired.");
                    return 1;
                }
                "invalid_grant" => {
                    println!("\nAuthorization failed (invalid grant/code). Please try 'auth' again.");
                    return 1;
                }
                other => {
                    eprintln!(
                        "\nUnexpected error during polling: {other} ({})",
                        err.error_description.as_deref().unwrap_or("-")
                    );
                    return 1;
                }
            }
        }

        eprintln!("\nUnexpected status during polling: {}", resp.status());
        return 1;
    }

    println!("\nAuthorization timed out.");
    1
}

// ─────────────────────────────────────────────────────────────────────────────
// status / deauth
// ─────────────────────────────────────────────────────────────────────────────

/// Report whether a token is stored.
pub fn status(provider: &dyn TokenProvider) -> i32 {
    match provider.token() {
        Ok(Some(_)) => {
            println!("Authenticated.");
            0
        }
        Ok(None) => {
            println!("Not authenticated. No token found in keychain.");
            0
        }
        Err(e) => {
            tracing::warn!(error = %e, "error checking authentication status");
            println!("Not authenticated. (Error accessing token)");
            0
        }
    }
}

/// Remove the stored token.
pub fn deauth(provider: &dyn TokenProvider) -> i32 {
    match provider.clear() {
        Ok(true) => {
            println!("Logged out. Token removed.");
            0
        }
        Ok(false) => {
            println!("Not authenticated. No active session to log out from.");
            0
        }
        Err(e) => {
            eprintln!("Error removing token from keychain: {e}");
            1
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
