//! Webhook shared secret

use secrecy::SecretString;
use tracing::info;

use crate::errors::ConsoleError;
use crate::filesys::file::File;

/// Load the webhook secret, generating and persisting one on first start
pub async fn get_or_create_webhook_secret(file: &File) -> Result<SecretString, ConsoleError> {
    if file.exists().await {
        info!("Webhook secret loaded from {}", file.path().display());
        let secret = file.read_string().await?;
        return Ok(SecretString::from(secret.trim().to_string()));
    }

    let bytes: [u8; 32] = rand::random();
    let secret = hex::encode(bytes);
    file.write_string(&secret).await?;
    file.set_permissions_600().await?;
    info!("Generated new webhook secret at {}", file.path().display());

    Ok(SecretString::from(secret))
}
