//! Signing certificate fingerprints of downloaded and installed packages.
//!
//! The fingerprint is the SHA-256 of the signer's DER certificate, not of the
//! package file, so it is stable across releases signed with the same key.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::apk;

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// Not a package, corrupt, or carries no signature. Not the same as a mismatch.
    #[error("package {path} is unreadable or unsigned: {reason}")]
    Unreadable { path: String, reason: String },
    #[error("package {package} is not installed")]
    NotInstalled { package: String },
    /// The tooling to read the installed package failed (device gone, adb missing).
    #[error("cannot inspect installed package: {0:#}")]
    Unavailable(anyhow::Error),
}

/// Where signer certificates come from.
#[async_trait]
pub trait SignerSource: Send + Sync {
    /// DER certificate that signed the package file at `path`.
    async fn artifact_signer(&self, path: &Path) -> Result<Vec<u8>, VerifyError>;

    /// DER certificate of the currently installed `package`.
    async fn installed_signer(&self, package: &str) -> Result<Vec<u8>, VerifyError>;
}

/// Read the signer of an APK on disk without blocking the runtime.
pub async fn read_apk_signer(path: &Path) -> Result<Vec<u8>, VerifyError> {
    let owned: PathBuf = path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || apk::signing_certificate(&owned))
        .await
        .map_err(|e| VerifyError::Unavailable(anyhow::anyhow!("signer task: {}", e)))?;
    result.map_err(|e| VerifyError::Unreadable {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// SHA-256 of `certificate` as lowercase hex.
pub fn certificate_fingerprint(certificate: &[u8]) -> String {
    hex::encode(Sha256::digest(certificate))
}

fn normalize(hex_fp: &str) -> String {
    hex_fp
        .trim()
        .chars()
        .filter(|c| *c != ':')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    pub passed: bool,
    pub observed_fingerprint_hex: String,
    pub expected_fingerprint_hex: String,
}

impl VerificationResult {
    fn compare(certificate: &[u8], expected: &str) -> Self {
        let observed = certificate_fingerprint(certificate);
        let expected = normalize(expected);
        Self {
            passed: observed == expected,
            observed_fingerprint_hex: observed,
            expected_fingerprint_hex: expected,
        }
    }
}

pub struct FingerprintVerifier<S: ?Sized> {
    source: Arc<S>,
}

impl<S: ?Sized> Clone for FingerprintVerifier<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
        }
    }
}

impl<S: SignerSource + ?Sized> FingerprintVerifier<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self { source }
    }

    /// Compare the signer of the package at `path` with `expected` (hex, any case).
    pub async fn verify_file(
        &self,
        path: &Path,
        expected: &str,
    ) -> Result<VerificationResult, VerifyError> {
        let cert = self.source.artifact_signer(path).await?;
        let result = VerificationResult::compare(&cert, expected);
        tracing::debug!(
            path = %path.display(),
            passed = result.passed,
            observed = %result.observed_fingerprint_hex,
            "verified package fingerprint"
        );
        Ok(result)
    }

    /// Compare the signer of the installed `package` with `expected`.
    pub async fn verify_installed(
        &self,
        package: &str,
        expected: &str,
    ) -> Result<VerificationResult, VerifyError> {
        let cert = self.source.installed_signer(package).await?;
        let result = VerificationResult::compare(&cert, expected);
        tracing::debug!(
            package,
            passed = result.passed,
            observed = %result.observed_fingerprint_hex,
            "verified installed fingerprint"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apk::testing::{fake_certificate, write_v1_apk};
    use std::collections::HashMap;

    /// Files are real APKs on disk; installed packages come from a map.
    struct LocalSigners {
        installed: HashMap<String, Vec<u8>>,
    }

    #[async_trait]
    impl SignerSource for LocalSigners {
        async fn artifact_signer(&self, path: &Path) -> Result<Vec<u8>, VerifyError> {
            read_apk_signer(path).await
        }

        async fn installed_signer(&self, package: &str) -> Result<Vec<u8>, VerifyError> {
            self.installed
                .get(package)
                .cloned()
                .ok_or_else(|| VerifyError::NotInstalled {
                    package: package.to_string(),
                })
        }
    }

    fn verifier(installed: &[(&str, Vec<u8>)]) -> FingerprintVerifier<LocalSigners> {
        FingerprintVerifier::new(Arc::new(LocalSigners {
            installed: installed
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }))
    }

    #[test]
    fn fingerprint_known_value() {
        assert_eq!(
            certificate_fingerprint(b"hello\n"),
            "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03"
        );
    }

    #[tokio::test]
    async fn matching_file_passes_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.apk");
        let cert = fake_certificate(1);
        write_v1_apk(&path, &cert);
        let expected = certificate_fingerprint(&cert).to_ascii_uppercase();

        let result = verifier(&[]).verify_file(&path, &expected).await.unwrap();
        assert!(result.passed);
        assert_eq!(result.observed_fingerprint_hex, certificate_fingerprint(&cert));
    }

    #[tokio::test]
    async fn colon_separated_expected_value_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.apk");
        let cert = fake_certificate(4);
        write_v1_apk(&path, &cert);
        let fp = certificate_fingerprint(&cert);
        let colons: Vec<String> = fp
            .as_bytes()
            .chunks(2)
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect();
        let result = verifier(&[])
            .verify_file(&path, &colons.join(":"))
            .await
            .unwrap();
        assert!(result.passed);
    }

    #[tokio::test]
    async fn mismatch_is_a_result_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.apk");
        write_v1_apk(&path, &fake_certificate(2));
        let result = verifier(&[])
            .verify_file(&path, &"cafebabe".repeat(8))
            .await
            .unwrap();
        assert!(!result.passed);
        assert_eq!(result.expected_fingerprint_hex, "cafebabe".repeat(8));
    }

    #[tokio::test]
    async fn unreadable_file_is_distinct_from_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.apk");
        std::fs::write(&path, b"not a zip").unwrap();
        let err = verifier(&[])
            .verify_file(&path, &"00".repeat(32))
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::Unreadable { .. }));
    }

    #[tokio::test]
    async fn verification_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.apk");
        write_v1_apk(&path, &fake_certificate(3));
        let v = verifier(&[]);
        let expected = "ab".repeat(32);
        let first = v.verify_file(&path, &expected).await.unwrap();
        let second = v.verify_file(&path, &expected).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn installed_package_checks() {
        let cert = fake_certificate(5);
        let fp = certificate_fingerprint(&cert);
        let v = verifier(&[("com.example", cert)]);
        assert!(v.verify_installed("com.example", &fp).await.unwrap().passed);
        assert!(!v
            .verify_installed("com.example", &"00".repeat(32))
            .await
            .unwrap()
            .passed);
        assert!(matches!(
            v.verify_installed("org.missing", &fp).await,
            Err(VerifyError::NotInstalled { .. })
        ));
    }
}
