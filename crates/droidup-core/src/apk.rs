//! Signing certificate extraction from APK files.
//!
//! Looks for an APK Signing Block (v3, then v2 scheme) in front of the zip
//! central directory, and falls back to the v1 JAR signature block
//! (`META-INF/*.RSA|*.DSA|*.EC`, a PKCS#7 SignedData). Either way the result is
//! the DER encoding of the first signer's certificate.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

const EOCD_SIGNATURE: u32 = 0x0605_4b50;
const EOCD_MIN_LEN: u64 = 22;
const MAX_COMMENT_LEN: u64 = 0xffff;
const SIG_BLOCK_MAGIC: &[u8; 16] = b"APK Sig Block 42";
const V2_BLOCK_ID: u32 = 0x7109_871a;
const V3_BLOCK_ID: u32 = 0xf053_68c0;
const MAX_SIG_BLOCK_LEN: u64 = 64 * 1024 * 1024;

/// OID 1.2.840.113549.1.7.2 (pkcs7-signedData), DER content bytes.
const OID_SIGNED_DATA: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x02];

#[derive(Debug, thiserror::Error)]
pub enum ApkError {
    #[error("read package: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("package is not signed")]
    Unsigned,
    #[error("malformed signature: {0}")]
    Malformed(&'static str),
}

/// DER bytes of the certificate that signed the APK at `path`.
pub fn signing_certificate(path: &Path) -> Result<Vec<u8>, ApkError> {
    let mut file = File::open(path)?;
    if let Some(cert) = signing_block_certificate(&mut file)? {
        return Ok(cert);
    }
    file.seek(SeekFrom::Start(0))?;
    jar_signature_certificate(file)
}

fn read_u32_le(buf: &[u8]) -> u32 {
    u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
}

fn read_u64_le(buf: &[u8]) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[..8]);
    u64::from_le_bytes(b)
}

/// Offset of the zip central directory, read from the end-of-central-directory record.
fn central_directory_offset<R: Read + Seek>(r: &mut R) -> Result<Option<u64>, ApkError> {
    let len = r.seek(SeekFrom::End(0))?;
    if len < EOCD_MIN_LEN {
        return Ok(None);
    }
    let tail_len = len.min(EOCD_MIN_LEN + MAX_COMMENT_LEN);
    r.seek(SeekFrom::Start(len - tail_len))?;
    let mut tail = vec![0u8; tail_len as usize];
    r.read_exact(&mut tail)?;

    let mut pos = tail.len() - EOCD_MIN_LEN as usize;
    loop {
        if read_u32_le(&tail[pos..]) == EOCD_SIGNATURE {
            return Ok(Some(u64::from(read_u32_le(&tail[pos + 16..]))));
        }
        if pos == 0 {
            return Ok(None);
        }
        pos -= 1;
    }
}

/// First certificate from a v3 or v2 APK Signing Block, or None if there is no block.
fn signing_block_certificate<R: Read + Seek>(r: &mut R) -> Result<Option<Vec<u8>>, ApkError> {
    let Some(cd_offset) = central_directory_offset(r)? else {
        return Ok(None);
    };
    if cd_offset < 32 {
        return Ok(None);
    }
    let mut footer = [0u8; 24];
    r.seek(SeekFrom::Start(cd_offset - 24))?;
    r.read_exact(&mut footer)?;
    if &footer[8..24] != SIG_BLOCK_MAGIC {
        return Ok(None);
    }
    let block_size = read_u64_le(&footer[..8]);
    if block_size < 24 || block_size > MAX_SIG_BLOCK_LEN || block_size + 8 > cd_offset {
        return Err(ApkError::Malformed("signing block size"));
    }
    // Pairs sit between the leading size field and the footer.
    let pairs_len = (block_size - 24) as usize;
    r.seek(SeekFrom::Start(cd_offset - block_size - 8 + 8))?;
    let mut pairs = vec![0u8; pairs_len];
    r.read_exact(&mut pairs)?;

    let mut v2 = None;
    let mut v3 = None;
    let mut rest = pairs.as_slice();
    while !rest.is_empty() {
        if rest.len() < 12 {
            return Err(ApkError::Malformed("signing block pair header"));
        }
        let pair_len = read_u64_le(rest);
        if pair_len < 4 || pair_len > (rest.len() - 8) as u64 {
            return Err(ApkError::Malformed("signing block pair length"));
        }
        let pair_len = pair_len as usize;
        let id = read_u32_le(&rest[8..]);
        let value = &rest[12..8 + pair_len];
        match id {
            V2_BLOCK_ID => v2 = Some(value),
            V3_BLOCK_ID => v3 = Some(value),
            _ => {}
        }
        rest = &rest[8 + pair_len..];
    }

    match v3.or(v2) {
        Some(scheme) => first_signer_certificate(scheme).map(|c| Some(c.to_vec())),
        None => Ok(None),
    }
}

/// Split a u32-LE length-prefixed field off the front of `buf`.
fn length_prefixed(buf: &[u8]) -> Result<(&[u8], &[u8]), ApkError> {
    if buf.len() < 4 {
        return Err(ApkError::Malformed("length prefix"));
    }
    let len = read_u32_le(buf) as usize;
    let body = &buf[4..];
    if len > body.len() {
        return Err(ApkError::Malformed("length-prefixed field overruns buffer"));
    }
    Ok((&body[..len], &body[len..]))
}

/// signers -> signer -> signed data -> (digests, certificates) -> certificate.
fn first_signer_certificate(scheme_block: &[u8]) -> Result<&[u8], ApkError> {
    let (signers, _) = length_prefixed(scheme_block)?;
    let (signer, _) = length_prefixed(signers)?;
    let (signed_data, _) = length_prefixed(signer)?;
    let (_digests, rest) = length_prefixed(signed_data)?;
    let (certificates, _) = length_prefixed(rest)?;
    let (cert, _) = length_prefixed(certificates)?;
    if cert.is_empty() {
        return Err(ApkError::Unsigned);
    }
    Ok(cert)
}

fn is_jar_signature_block(name: &str) -> bool {
    let Some(file) = name.strip_prefix("META-INF/") else {
        return false;
    };
    if file.contains('/') {
        return false;
    }
    let upper = file.to_ascii_uppercase();
    upper.ends_with(".RSA") || upper.ends_with(".DSA") || upper.ends_with(".EC")
}

fn jar_signature_certificate<R: Read + Seek>(r: R) -> Result<Vec<u8>, ApkError> {
    let mut archive = zip::ZipArchive::new(r)?;
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| is_jar_signature_block(n))
        .map(str::to_owned)
        .collect();
    names.sort();
    let Some(name) = names.first() else {
        return Err(ApkError::Unsigned);
    };
    let mut pkcs7 = Vec::new();
    archive.by_name(name)?.read_to_end(&mut pkcs7)?;
    pkcs7_first_certificate(&pkcs7).map(<[u8]>::to_vec)
}

/// One DER element: tag byte, content, and the full encoding.
struct Der<'a> {
    tag: u8,
    content: &'a [u8],
    encoded: &'a [u8],
}

fn read_der(input: &[u8]) -> Result<(Der<'_>, &[u8]), ApkError> {
    if input.len() < 2 {
        return Err(ApkError::Malformed("truncated DER element"));
    }
    let tag = input[0];
    if tag & 0x1f == 0x1f {
        return Err(ApkError::Malformed("multi-byte DER tag"));
    }
    let first = input[1];
    let (len, header) = if first < 0x80 {
        (first as usize, 2)
    } else {
        let n = (first & 0x7f) as usize;
        if n == 0 || n > 4 {
            return Err(ApkError::Malformed("unsupported DER length"));
        }
        if input.len() < 2 + n {
            return Err(ApkError::Malformed("truncated DER length"));
        }
        let len = input[2..2 + n]
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | *b as usize);
        (len, 2 + n)
    };
    if input.len() - header < len {
        return Err(ApkError::Malformed("DER element overruns buffer"));
    }
    let end = header + len;
    Ok((
        Der {
            tag,
            content: &input[header..end],
            encoded: &input[..end],
        },
        &input[end..],
    ))
}

fn expect_der<'a>(
    input: &'a [u8],
    tag: u8,
    what: &'static str,
) -> Result<(Der<'a>, &'a [u8]), ApkError> {
    let (el, rest) = read_der(input)?;
    if el.tag != tag {
        return Err(ApkError::Malformed(what));
    }
    Ok((el, rest))
}

/// ContentInfo { signedData, [0] SignedData { version, digestAlgorithms,
/// encapContentInfo, [0] IMPLICIT certificates, ... } } -> first certificate.
fn pkcs7_first_certificate(pkcs7: &[u8]) -> Result<&[u8], ApkError> {
    let (content_info, _) = expect_der(pkcs7, 0x30, "ContentInfo is not a SEQUENCE")?;
    let (oid, rest) = expect_der(content_info.content, 0x06, "ContentInfo type is not an OID")?;
    if oid.content != OID_SIGNED_DATA {
        return Err(ApkError::Malformed("ContentInfo is not signedData"));
    }
    let (explicit, _) = expect_der(rest, 0xa0, "missing SignedData content")?;
    let (signed_data, _) = expect_der(explicit.content, 0x30, "SignedData is not a SEQUENCE")?;

    let (_version, rest) = expect_der(signed_data.content, 0x02, "SignedData version")?;
    let (_digest_algs, rest) = expect_der(rest, 0x31, "SignedData digestAlgorithms")?;
    let (_encap, rest) = expect_der(rest, 0x30, "SignedData encapContentInfo")?;
    let (certs, _) = match read_der(rest) {
        Ok((el, r)) if el.tag == 0xa0 => (el, r),
        _ => return Err(ApkError::Unsigned),
    };
    let (cert, _) = expect_der(certs.content, 0x30, "certificate is not a SEQUENCE")?;
    Ok(cert.encoded)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Builders for synthetic signed packages.

    use std::io::Write;

    pub(crate) fn der(tag: u8, content: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        let len = content.len();
        if len < 0x80 {
            out.push(len as u8);
        } else if len < 0x100 {
            out.extend_from_slice(&[0x81, len as u8]);
        } else {
            out.extend_from_slice(&[0x82, (len >> 8) as u8, len as u8]);
        }
        out.extend_from_slice(content);
        out
    }

    /// A stand-in certificate: any DER SEQUENCE whose bytes vary with `seed`.
    pub(crate) fn fake_certificate(seed: u8) -> Vec<u8> {
        let serial = der(0x02, &[seed]);
        let name = der(0x0c, format!("signer-{seed}").as_bytes());
        der(0x30, &[serial, name].concat())
    }

    pub(crate) fn pkcs7_with(cert: &[u8]) -> Vec<u8> {
        let signed_data = der(
            0x30,
            &[
                der(0x02, &[1]),
                der(0x31, &[]),
                der(0x30, &der(0x06, &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x01])),
                der(0xa0, cert),
                der(0x31, &[]),
            ]
            .concat(),
        );
        der(
            0x30,
            &[
                der(0x06, super::OID_SIGNED_DATA),
                der(0xa0, &signed_data),
            ]
            .concat(),
        )
    }

    /// Zip with a v1 signature block containing `cert`.
    pub(crate) fn write_v1_apk(path: &std::path::Path, cert: &[u8]) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let opts = zip::write::FileOptions::default();
        zip.start_file("AndroidManifest.xml", opts).unwrap();
        zip.write_all(b"<manifest/>").unwrap();
        zip.start_file("META-INF/CERT.RSA", opts).unwrap();
        zip.write_all(&pkcs7_with(cert)).unwrap();
        zip.finish().unwrap();
    }

    fn lp(body: &[u8]) -> Vec<u8> {
        let mut out = (body.len() as u32).to_le_bytes().to_vec();
        out.extend_from_slice(body);
        out
    }

    /// Bytes of a file carrying an APK Signing Block with one v2 signer using `cert`.
    pub(crate) fn v2_apk_bytes(cert: &[u8]) -> Vec<u8> {
        let signed_data = [lp(&[]), lp(&lp(cert)), lp(&[])].concat();
        let signer = [lp(&signed_data), lp(&[]), lp(&[])].concat();
        let scheme = lp(&lp(&signer));

        let mut pair = Vec::new();
        pair.extend_from_slice(&((scheme.len() + 4) as u64).to_le_bytes());
        pair.extend_from_slice(&super::V2_BLOCK_ID.to_le_bytes());
        pair.extend_from_slice(&scheme);

        let block_size = (pair.len() + 24) as u64;
        let mut block = block_size.to_le_bytes().to_vec();
        block.extend_from_slice(&pair);
        block.extend_from_slice(&block_size.to_le_bytes());
        block.extend_from_slice(super::SIG_BLOCK_MAGIC);

        let entries = b"entries".to_vec();
        let cd_offset = (entries.len() + block.len()) as u32;
        let mut eocd = super::EOCD_SIGNATURE.to_le_bytes().to_vec();
        // disk numbers, entry counts, central directory size
        eocd.extend_from_slice(&[0u8; 12]);
        eocd.extend_from_slice(&cd_offset.to_le_bytes());
        eocd.extend_from_slice(&0u16.to_le_bytes());

        [entries, block, eocd].concat()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::io::Write;

    #[test]
    fn v1_signature_block_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.apk");
        let cert = fake_certificate(7);
        write_v1_apk(&path, &cert);
        assert_eq!(signing_certificate(&path).unwrap(), cert);
    }

    #[test]
    fn v2_signing_block_certificate() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        let cert = fake_certificate(9);
        f.write_all(&v2_apk_bytes(&cert)).unwrap();
        f.flush().unwrap();
        assert_eq!(signing_certificate(f.path()).unwrap(), cert);
    }

    #[test]
    fn zip_without_signature_is_unsigned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.apk");
        let mut zip = zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
        zip.start_file("classes.dex", zip::write::FileOptions::default())
            .unwrap();
        zip.write_all(b"dex").unwrap();
        zip.finish().unwrap();
        assert!(matches!(signing_certificate(&path), Err(ApkError::Unsigned)));
    }

    #[test]
    fn non_zip_is_rejected() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"<html>404 not found</html>").unwrap();
        f.flush().unwrap();
        assert!(matches!(signing_certificate(f.path()), Err(ApkError::Zip(_))));
    }

    #[test]
    fn signature_block_names() {
        assert!(is_jar_signature_block("META-INF/CERT.RSA"));
        assert!(is_jar_signature_block("META-INF/release.ec"));
        assert!(!is_jar_signature_block("META-INF/CERT.SF"));
        assert!(!is_jar_signature_block("META-INF/sub/CERT.RSA"));
        assert!(!is_jar_signature_block("assets/CERT.RSA"));
    }

    #[test]
    fn pkcs7_rejects_other_content_types() {
        let data = der(
            0x30,
            &[der(0x06, &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x01]), der(0xa0, &[])].concat(),
        );
        assert!(matches!(
            pkcs7_first_certificate(&data),
            Err(ApkError::Malformed("ContentInfo is not signedData"))
        ));
    }

    #[test]
    fn long_form_lengths_are_decoded() {
        let cert = der(0x30, &der(0x04, &[0xab; 300]));
        assert_eq!(pkcs7_first_certificate(&pkcs7_with(&cert)).unwrap(), &cert[..]);
    }
}
