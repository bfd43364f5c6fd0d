//! `droidup fingerprint <path>` – print the signer fingerprint of an APK.

use anyhow::{Context, Result};
use droidup_core::apps::App;
use droidup_core::fingerprint::{certificate_fingerprint, read_apk_signer};
use std::path::Path;

pub async fn run_fingerprint(path: &Path) -> Result<()> {
    let cert = read_apk_signer(path)
        .await
        .with_context(|| format!("read signer of {}", path.display()))?;
    let fp = certificate_fingerprint(&cert);
    println!("{}  {}", fp, path.display());
    match known_signer(&fp) {
        Some(app) => println!("signed with the {} release key", app.title()),
        None => println!("not the release key of any tracked app"),
    }
    Ok(())
}

fn known_signer(fp: &str) -> Option<App> {
    App::ALL
        .into_iter()
        .find(|app| app.signature_fingerprint().eq_ignore_ascii_case(fp))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_signer_matches_any_case() {
        let mull = App::Mull.signature_fingerprint().to_ascii_uppercase();
        assert_eq!(known_signer(&mull), Some(App::Mull));
        assert_eq!(known_signer(&"00".repeat(32)), None);
    }
}
