// TLS 1.3 key schedule (RFC 8446 Section 7.1), parameterised by the
// negotiated cipher suite's hash.

use aws_lc_rs::{agreement, hmac};
use std::io::{Error, ErrorKind, Result};

use super::tls13_cipher_suite::CipherSuite;

/// Handshake traffic secrets plus the master secret used later for the
/// application traffic secrets.
#[derive(Clone)]
pub struct Tls13HandshakeKeys {
    pub client_handshake_traffic_secret: Vec<u8>,
    pub server_handshake_traffic_secret: Vec<u8>,
    pub master_secret: Vec<u8>,
}

/// HKDF-Extract
pub fn hkdf_extract(cipher_suite: CipherSuite, salt: &[u8], ikm: &[u8]) -> Vec<u8> {
    let key = hmac::Key::new(cipher_suite.hmac_algorithm(), salt);
    hmac::sign(&key, ikm).as_ref().to_vec()
}

/// HKDF-Expand (RFC 5869 Section 2.3)
pub fn hkdf_expand(
    cipher_suite: CipherSuite,
    prk: &[u8],
    info: &[u8],
    length: usize,
) -> Result<Vec<u8>> {
    let hash_len = cipher_suite.hash_len();
    let n = length.div_ceil(hash_len);
    if n > 255 {
        return Err(Error::new(ErrorKind::InvalidData, "HKDF output too long"));
    }

    let key = hmac::Key::new(cipher_suite.hmac_algorithm(), prk);
    let mut output = Vec::with_capacity(n * hash_len);
    let mut prev: Vec<u8> = Vec::new();

    for i in 1..=n {
        let mut ctx = hmac::Context::with_key(&key);
        ctx.update(&prev);
        ctx.update(info);
        ctx.update(&[i as u8]);
        let tag = ctx.sign();
        prev = tag.as_ref().to_vec();
        output.extend_from_slice(tag.as_ref());
    }

    output.truncate(length);
    Ok(output)
}

/// HKDF-Expand-Label
pub fn hkdf_expand_label(
    cipher_suite: CipherSuite,
    secret: &[u8],
    label: &[u8],
    context: &[u8],
    length: usize,
) -> Result<Vec<u8>> {
    // struct {
    //     uint16 length = Length;
    //     opaque label<7..255> = "tls13 " + Label;
    //     opaque context<0..255> = Context;
    // } HkdfLabel;
    let full_label_len = 6 + label.len();
    if full_label_len > 255 || context.len() > 255 {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            "HKDF label or context too long",
        ));
    }

    let mut hkdf_label = Vec::with_capacity(2 + 1 + full_label_len + 1 + context.len());
    hkdf_label.extend_from_slice(&(length as u16).to_be_bytes());
    hkdf_label.push(full_label_len as u8);
    hkdf_label.extend_from_slice(b"tls13 ");
    hkdf_label.extend_from_slice(label);
    hkdf_label.push(context.len() as u8);
    hkdf_label.extend_from_slice(context);

    hkdf_expand(cipher_suite, secret, &hkdf_label, length)
}

/// Derive-Secret(Secret, Label, Messages) with the messages already hashed.
pub fn derive_secret(
    cipher_suite: CipherSuite,
    secret: &[u8],
    label: &[u8],
    messages_hash: &[u8],
) -> Result<Vec<u8>> {
    hkdf_expand_label(
        cipher_suite,
        secret,
        label,
        messages_hash,
        cipher_suite.hash_len(),
    )
}

/// Derive the handshake traffic secrets and the master secret.
///
/// `server_hello_hash` is the transcript hash of ClientHello..ServerHello.
pub fn derive_handshake_keys(
    cipher_suite: CipherSuite,
    shared_secret: &[u8],
    server_hello_hash: &[u8],
) -> Result<Tls13HandshakeKeys> {
    let hash_len = cipher_suite.hash_len();
    if server_hello_hash.len() != hash_len {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            format!(
                "transcript hash must be {} bytes, got {}",
                hash_len,
                server_hello_hash.len()
            ),
        ));
    }

    let zeros = vec![0u8; hash_len];
    let empty_hash = cipher_suite.transcript_hash(b"");

    let early_secret = hkdf_extract(cipher_suite, &zeros, &zeros);
    let derived = derive_secret(cipher_suite, &early_secret, b"derived", &empty_hash)?;
    let handshake_secret = hkdf_extract(cipher_suite, &derived, shared_secret);

    let client_handshake_traffic_secret =
        derive_secret(cipher_suite, &handshake_secret, b"c hs traffic", server_hello_hash)?;
    let server_handshake_traffic_secret =
        derive_secret(cipher_suite, &handshake_secret, b"s hs traffic", server_hello_hash)?;

    let derived = derive_secret(cipher_suite, &handshake_secret, b"derived", &empty_hash)?;
    let master_secret = hkdf_extract(cipher_suite, &derived, &zeros);

    Ok(Tls13HandshakeKeys {
        client_handshake_traffic_secret,
        server_handshake_traffic_secret,
        master_secret,
    })
}

/// Derive (client, server) application traffic secrets from the transcript hash
/// that includes the server Finished message.
pub fn derive_application_secrets(
    cipher_suite: CipherSuite,
    master_secret: &[u8],
    handshake_hash: &[u8],
) -> Result<(Vec<u8>, Vec<u8>)> {
    let client = derive_secret(cipher_suite, master_secret, b"c ap traffic", handshake_hash)?;
    let server = derive_secret(cipher_suite, master_secret, b"s ap traffic", handshake_hash)?;
    Ok((client, server))
}

/// Derive the record protection key and static IV from a traffic secret.
pub fn derive_traffic_keys(
    cipher_suite: CipherSuite,
    traffic_secret: &[u8],
) -> Result<(Vec<u8>, Vec<u8>)> {
    let key = hkdf_expand_label(
        cipher_suite,
        traffic_secret,
        b"key",
        b"",
        cipher_suite.key_len(),
    )?;
    let iv = hkdf_expand_label(
        cipher_suite,
        traffic_secret,
        b"iv",
        b"",
        cipher_suite.nonce_len(),
    )?;
    Ok((key, iv))
}

/// verify_data = HMAC(finished_key, transcript_hash)
pub fn compute_finished_verify_data(
    cipher_suite: CipherSuite,
    base_key: &[u8],
    handshake_hash: &[u8],
) -> Result<Vec<u8>> {
    let finished_key = hkdf_expand_label(
        cipher_suite,
        base_key,
        b"finished",
        b"",
        cipher_suite.hash_len(),
    )?;
    let key = hmac::Key::new(cipher_suite.hmac_algorithm(), &finished_key);
    Ok(hmac::sign(&key, handshake_hash).as_ref().to_vec())
}

/// Constant-time check of a peer's Finished verify_data.
pub fn verify_finished(
    cipher_suite: CipherSuite,
    base_key: &[u8],
    handshake_hash: &[u8],
    received: &[u8],
) -> Result<()> {
    use subtle::ConstantTimeEq;

    let expected = compute_finished_verify_data(cipher_suite, base_key, handshake_hash)?;
    if expected.len() != received.len() || !bool::from(expected.ct_eq(received)) {
        return Err(Error::new(
            ErrorKind::PermissionDenied,
            "Finished verify_data mismatch",
        ));
    }
    Ok(())
}

/// Fresh x25519 key pair as (private key, public key bytes).
pub fn generate_x25519_key_pair() -> Result<(agreement::PrivateKey, Vec<u8>)> {
    let private_key = agreement::PrivateKey::generate(&agreement::X25519)
        .map_err(|_| Error::other("Failed to generate X25519 key"))?;
    let public_key = private_key
        .compute_public_key()
        .map_err(|_| Error::other("Failed to compute public key"))?;
    Ok((private_key, public_key.as_ref().to_vec()))
}

/// x25519 shared secret with the peer's key share.
pub fn x25519_shared_secret(
    private_key: &agreement::PrivateKey,
    peer_public_key: &[u8],
) -> Result<Vec<u8>> {
    if peer_public_key.len() != 32 {
        return Err(Error::new(
            ErrorKind::InvalidData,
            format!("invalid x25519 key share length: {}", peer_public_key.len()),
        ));
    }
    let peer_public_key = agreement::UnparsedPublicKey::new(&agreement::X25519, peer_public_key);
    agreement::agree(
        private_key,
        peer_public_key,
        Error::new(ErrorKind::InvalidData, "ECDH failed"),
        |key_material| Ok(key_material.to_vec()),
    )
}
