//! `droidup apps` – list tracked apps.

use droidup_core::apps::App;

pub fn run_apps() {
    println!(
        "{:<8} {:<14} {:<22} {:<8} {}",
        "APP", "TITLE", "PACKAGE", "SOURCE", "SIGNER SHA-256"
    );
    for app in App::ALL {
        println!(
            "{:<8} {:<14} {:<22} {:<8} {}",
            app.key(),
            app.title(),
            app.package_name(),
            app.download_source().label(),
            app.signature_fingerprint()
        );
    }
}
