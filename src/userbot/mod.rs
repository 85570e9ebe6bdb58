//! User-account session used to read stories the bot API cannot see.

mod client;

use anyhow::{Context, Result};
use dialoguer::{Input, Password};
use tracing::info;

pub use client::{mask_phone, Userbot, UserbotError};

use crate::config::UserbotConfig;

/// Signs the userbot in interactively unless the stored session is still valid.
pub async fn ensure_authorized(userbot: &Userbot, config: &UserbotConfig) -> Result<()> {
    if userbot
        .is_authorized()
        .await
        .context("Failed to check userbot authorization")?
    {
        info!("Userbot session is authorized");
        return Ok(());
    }

    info!(
        "Userbot authentication required for {}",
        mask_phone(&config.phone)
    );

    let token = userbot
        .request_login_code(&config.phone, &config.api_hash)
        .await
        .context("Failed to request login code")?;

    info!("Login code sent to your Telegram app");

    let code: String = Input::new()
        .with_prompt("Enter the login code")
        .interact_text()?;

    match userbot.sign_in(&token, &code).await {
        Ok(()) => {
            info!("Userbot signed in");
            Ok(())
        }
        Err(UserbotError::PasswordRequired(password_token)) => {
            info!("Two-factor authentication is enabled");
            let hint = password_token.hint().unwrap_or("no hint");
            info!("Password hint: {}", hint);

            let password: String = Password::new()
                .with_prompt("Enter your 2FA password")
                .interact()?;

            userbot
                .check_password(password_token, &password)
                .await
                .context("2FA authentication failed")?;

            info!("Userbot signed in with 2FA");
            Ok(())
        }
        Err(e) => Err(e).context("Userbot authentication failed"),
    }
}
