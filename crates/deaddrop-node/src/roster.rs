use std::path::Path;

use anyhow::Context;
use tracing::{info, warn};

use deaddrop_shared::types::Contact;

/// Load the contact roster from a JSON array of `{id, publicKey}` objects.
///
/// Entries with an empty id are dropped; entries without a key are kept
/// (the receive loop still polls them) but logged.
pub async fn load(path: &Path) -> anyhow::Result<Vec<Contact>> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading roster {}", path.display()))?;
    let contacts = parse(&bytes).with_context(|| format!("parsing roster {}", path.display()))?;

    info!(path = %path.display(), contacts = contacts.len(), "Roster loaded");
    Ok(contacts)
}

fn parse(bytes: &[u8]) -> serde_json::Result<Vec<Contact>> {
    let contacts: Vec<Contact> = serde_json::from_slice(bytes)?;
    Ok(contacts
        .into_iter()
        .filter(|contact| !contact.id.trim().is_empty())
        .inspect(|contact| {
            if contact.usable_key().is_none() {
                warn!(contact = %contact.id, "Contact has no public key, sends to it will fail");
            }
        })
        .collect())
}
