// Server authentication for the hand-rolled client: chain validation through a
// rustls verifier and CertificateVerify signature checking with aws-lc-rs.

use std::io;
use std::sync::Arc;

use aws_lc_rs::signature::{self, UnparsedPublicKey, VerificationAlgorithm};
use rustls::client::danger::ServerCertVerifier;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

use super::tls13_messages::certificate_verify_message;

fn verification_algorithm(scheme: u16) -> Option<&'static dyn VerificationAlgorithm> {
    let algorithm: &'static dyn VerificationAlgorithm = match scheme {
        0x0403 => &signature::ECDSA_P256_SHA256_ASN1,
        0x0503 => &signature::ECDSA_P384_SHA384_ASN1,
        0x0603 => &signature::ECDSA_P521_SHA512_ASN1,
        0x0804 => &signature::RSA_PSS_2048_8192_SHA256,
        0x0805 => &signature::RSA_PSS_2048_8192_SHA384,
        0x0806 => &signature::RSA_PSS_2048_8192_SHA512,
        0x0401 => &signature::RSA_PKCS1_2048_8192_SHA256,
        0x0501 => &signature::RSA_PKCS1_2048_8192_SHA384,
        0x0601 => &signature::RSA_PKCS1_2048_8192_SHA512,
        0x0807 => &signature::ED25519,
        _ => return None,
    };
    Some(algorithm)
}

/// Validate the server chain (leaf first) for `server_name`.
pub fn verify_certificate_chain(
    verifier: &Arc<dyn ServerCertVerifier>,
    chain: &[CertificateDer<'static>],
    server_name: &str,
) -> io::Result<()> {
    let (end_entity, intermediates) = chain.split_first().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "empty certificate chain")
    })?;
    let server_name = ServerName::try_from(server_name.to_string()).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid server name {}: {}", server_name, e),
        )
    })?;
    verifier
        .verify_server_cert(end_entity, intermediates, &server_name, &[], UnixTime::now())
        .map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("certificate verification failed: {}", e),
            )
        })?;
    Ok(())
}

/// Check a server CertificateVerify signature over `transcript_hash` with the
/// public key of `cert_der`.
pub fn verify_certificate_verify(
    cert_der: &[u8],
    scheme: u16,
    signature: &[u8],
    transcript_hash: &[u8],
) -> io::Result<()> {
    let algorithm = verification_algorithm(scheme).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported signature scheme 0x{:04x}", scheme),
        )
    })?;
    let (_, cert) = X509Certificate::from_der(cert_der).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("failed to parse server certificate: {}", e),
        )
    })?;
    let public_key: &[u8] = &cert.public_key().subject_public_key.data;
    let content = certificate_verify_message(transcript_hash, true);
    UnparsedPublicKey::new(algorithm, public_key)
        .verify(&content, signature)
        .map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                "CertificateVerify signature verification failed",
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_lc_rs::rand::SystemRandom;
    use aws_lc_rs::signature::{ECDSA_P256_SHA256_ASN1_SIGNING, EcdsaKeyPair};

    fn p256_certificate() -> (Vec<u8>, EcdsaKeyPair) {
        let key_pair = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let params = rcgen::CertificateParams::new(vec!["cover.example".to_string()]).unwrap();
        let cert = params.self_signed(&key_pair).unwrap();
        let signing = EcdsaKeyPair::from_pkcs8(
            &ECDSA_P256_SHA256_ASN1_SIGNING,
            &key_pair.serialize_der(),
        )
        .unwrap();
        (cert.der().to_vec(), signing)
    }

    #[test]
    fn test_certificate_verify_signature() {
        let (cert_der, key) = p256_certificate();
        let hash = [0x5au8; 32];
        let content = certificate_verify_message(&hash, true);
        let sig = key.sign(&SystemRandom::new(), &content).unwrap();

        verify_certificate_verify(&cert_der, 0x0403, sig.as_ref(), &hash).unwrap();
        assert!(verify_certificate_verify(&cert_der, 0x0403, sig.as_ref(), &[0u8; 32]).is_err());
        assert!(verify_certificate_verify(&cert_der, 0x0804, sig.as_ref(), &hash).is_err());
        assert!(verify_certificate_verify(&cert_der, 0x0203, sig.as_ref(), &hash).is_err());
    }

    #[test]
    fn test_self_signed_chain_rejected_by_webpki() {
        let (cert_der, _) = p256_certificate();
        let verifier: Arc<dyn ServerCertVerifier> = crate::rustls_util::webpki_server_verifier().unwrap();
        let chain = vec![CertificateDer::from(cert_der)];
        let err = verify_certificate_chain(&verifier, &chain, "cover.example").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(verify_certificate_chain(&verifier, &[], "cover.example").is_err());
    }
}
