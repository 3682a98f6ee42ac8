//! Source-control account

use secrecy::SecretString;
use serde::Deserialize;

/// A connected source-control account. The access token doubles as the
/// clone credential for private repositories.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub login: String,
    pub access_token: SecretString,
}
