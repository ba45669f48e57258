//! Enveloped XML-DSig over `infDPS`: Exclusive C14N, SHA-256 digest,
//! RSASSA-PKCS1-v1_5 with SHA-256.

use crate::adapters::certificate::{parse_der, public_key_of, SigningCredentials};
use crate::core::builder::DpsDocument;
use crate::core::xml::{
    canonicalize, canonicalize_enveloped, parse_document, to_document_string, XmlElement, XMLDSIG_NS,
};
use crate::domain::model::SignedDocument;
use crate::utils::error::{EmissorError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use sha2::{Digest, Sha256};
use tracing::debug;

pub const EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
pub const RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
pub const ENVELOPED_SIGNATURE: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
pub const SHA256_DIGEST: &str = "http://www.w3.org/2001/04/xmlenc#sha256";

/// Result of checking a signed DPS on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedSignature {
    pub reference_id: String,
    pub digest_value: String,
    /// Base64 DER of the embedded certificate, whitespace removed.
    pub certificate: String,
}

#[derive(Debug, Clone, Default)]
pub struct DpsSigner;

impl DpsSigner {
    pub fn new() -> Self {
        Self
    }

    pub fn sign(&self, document: DpsDocument, credentials: &SigningCredentials) -> Result<SignedDocument> {
        credentials.check_validity(Utc::now())?;

        let DpsDocument { mut root, id, .. } = document;
        let digest_value = {
            let target = root
                .find_by_attribute("Id", &id)
                .filter(|e| e.name == "infDPS")
                .ok_or_else(|| EmissorError::signing(format!("infDPS with Id '{}' not found", id)))?;
            digest(target)
        };

        let signed_info = signed_info(&id, &digest_value);
        let signing_key = SigningKey::<Sha256>::new(credentials.private_key().clone());
        let signature = signing_key
            .try_sign(canonicalize(&signed_info).as_bytes())
            .map_err(|e| EmissorError::signing(format!("RSA signing failed: {}", e)))?;
        let signature_value = STANDARD.encode(signature.to_bytes());
        let certificate = credentials.certificate_base64();

        let mut signature_el = XmlElement::new("Signature", Some(XMLDSIG_NS));
        signature_el.push_element(signed_info);
        signature_el.add_text_child("SignatureValue", signature_value.as_str());
        signature_el
            .add_child("KeyInfo")
            .add_child("X509Data")
            .add_text_child("X509Certificate", wrap_base64(&certificate));
        root.push_element(signature_el);

        let xml = to_document_string(&root)?;
        let verified = verify_signed_xml(&xml)
            .map_err(|e| EmissorError::signing(format!("self-verification failed: {}", e)))?;
        if verified.certificate != certificate || verified.reference_id != id {
            return Err(EmissorError::signing("self-verification read back a different signature"));
        }

        debug!("✍️ DPS {} assinada (digest {})", id, digest_value);

        Ok(SignedDocument {
            xml,
            id,
            digest_value,
            signature_value,
            certificate,
        })
    }
}

/// Parses a signed DPS, recomputes the reference digest and checks the
/// signature against the public key of the embedded certificate.
pub fn verify_signed_xml(xml: &str) -> Result<VerifiedSignature> {
    let root = parse_document(xml)?;
    let signature = root
        .elements()
        .find(|e| e.name == "Signature" && e.namespace.as_deref() == Some(XMLDSIG_NS))
        .ok_or_else(|| EmissorError::signing("document has no Signature"))?;
    let signed_info = required(signature, "SignedInfo")?;

    let algorithm = |parent: &XmlElement, name: &str| -> Result<String> {
        Ok(required(parent, name)?.attribute("Algorithm").unwrap_or_default().to_string())
    };
    if algorithm(signed_info, "CanonicalizationMethod")? != EXC_C14N {
        return Err(EmissorError::signing("unsupported canonicalization method"));
    }
    if algorithm(signed_info, "SignatureMethod")? != RSA_SHA256 {
        return Err(EmissorError::signing("unsupported signature method"));
    }

    let reference = required(signed_info, "Reference")?;
    if algorithm(reference, "DigestMethod")? != SHA256_DIGEST {
        return Err(EmissorError::signing("unsupported digest method"));
    }
    let reference_id = reference
        .attribute("URI")
        .and_then(|uri| uri.strip_prefix('#'))
        .ok_or_else(|| EmissorError::signing("Reference URI must point to a local Id"))?
        .to_string();
    let target = root
        .find_by_attribute("Id", &reference_id)
        .ok_or_else(|| EmissorError::signing(format!("referenced element '{}' not found", reference_id)))?;

    let digest_value = digest(target);
    if digest_value != strip_whitespace(&required(reference, "DigestValue")?.text()) {
        return Err(EmissorError::signing("digest mismatch: signed content was altered"));
    }

    let certificate = strip_whitespace(
        &signature
            .find("X509Certificate")
            .ok_or_else(|| EmissorError::signing("document has no X509Certificate"))?
            .text(),
    );
    let der = STANDARD
        .decode(&certificate)
        .map_err(|e| EmissorError::signing(format!("X509Certificate is not base64: {}", e)))?;
    let public_key = public_key_of(&parse_der(&der)?)?;

    let signature_bytes = STANDARD
        .decode(strip_whitespace(&required(signature, "SignatureValue")?.text()))
        .map_err(|e| EmissorError::signing(format!("SignatureValue is not base64: {}", e)))?;
    let rsa_signature = Signature::try_from(signature_bytes.as_slice())
        .map_err(|e| EmissorError::signing(format!("malformed signature: {}", e)))?;
    VerifyingKey::<Sha256>::new(public_key)
        .verify(canonicalize(signed_info).as_bytes(), &rsa_signature)
        .map_err(|_| EmissorError::signing("signature does not verify against the embedded certificate"))?;

    Ok(VerifiedSignature {
        reference_id,
        digest_value,
        certificate,
    })
}

fn required<'a>(parent: &'a XmlElement, name: &str) -> Result<&'a XmlElement> {
    parent
        .child(name)
        .ok_or_else(|| EmissorError::signing(format!("{} is missing {}", parent.name, name)))
}

fn digest(target: &XmlElement) -> String {
    STANDARD.encode(Sha256::digest(canonicalize_enveloped(target).as_bytes()))
}

fn signed_info(id: &str, digest_value: &str) -> XmlElement {
    let mut signed_info = XmlElement::new("SignedInfo", Some(XMLDSIG_NS));
    signed_info
        .add_child("CanonicalizationMethod")
        .set_attribute("Algorithm", EXC_C14N);
    signed_info
        .add_child("SignatureMethod")
        .set_attribute("Algorithm", RSA_SHA256);

    let reference = signed_info.add_child("Reference");
    reference.set_attribute("URI", &format!("#{}", id));
    let transforms = reference.add_child("Transforms");
    transforms
        .add_child("Transform")
        .set_attribute("Algorithm", ENVELOPED_SIGNATURE);
    transforms
        .add_child("Transform")
        .set_attribute("Algorithm", EXC_C14N);
    reference
        .add_child("DigestMethod")
        .set_attribute("Algorithm", SHA256_DIGEST);
    reference.add_text_child("DigestValue", digest_value);
    signed_info
}

/// 64-column lines with a leading and trailing newline.
fn wrap_base64(b64: &str) -> String {
    let mut out = String::with_capacity(b64.len() + b64.len() / 64 + 2);
    out.push('\n');
    for chunk in b64.as_bytes().chunks(64) {
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push('\n');
    }
    out
}

fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::builder::DpsBuilder;
    use crate::core::test_support::{credentials, expired_credentials, sample_request};

    fn signed() -> SignedDocument {
        let document = DpsBuilder::new().build(&sample_request()).unwrap();
        DpsSigner::new().sign(document, &credentials()).unwrap()
    }

    #[test]
    fn test_signature_self_verifies() {
        let signed = signed();
        let verified = verify_signed_xml(&signed.xml).unwrap();
        assert_eq!(verified.reference_id, signed.id);
        assert_eq!(verified.digest_value, signed.digest_value);
        assert_eq!(verified.certificate, signed.certificate);
    }

    #[test]
    fn test_signature_is_last_child_of_dps() {
        let signed = signed();
        assert!(signed.xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        let root = parse_document(&signed.xml).unwrap();
        let names: Vec<&str> = root.elements().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["infDPS", "Signature"]);
        let reference = root.find("Reference").unwrap();
        assert_eq!(reference.attribute("URI"), Some(format!("#{}", signed.id).as_str()));
        assert!(signed.xml.contains("<Signature xmlns=\"http://www.w3.org/2000/09/xmldsig#\">"));
    }

    #[test]
    fn test_digest_covers_canonical_inf_dps() {
        let document = DpsBuilder::new().build(&sample_request()).unwrap();
        let canonical = canonicalize(document.root.find("infDPS").unwrap());
        assert!(canonical.starts_with(&format!(
            "<infDPS xmlns=\"http://www.sped.fazenda.gov.br/nfse\" Id=\"{}\">",
            document.id
        )));
        let expected = STANDARD.encode(Sha256::digest(canonical.as_bytes()));

        let signed = DpsSigner::new().sign(document, &credentials()).unwrap();
        assert_eq!(signed.digest_value, expected);
    }

    #[test]
    fn test_certificate_text_is_wrapped() {
        let signed = signed();
        let root = parse_document(&signed.xml).unwrap();
        let text = root.find("X509Certificate").unwrap().text();
        assert!(text.starts_with('\n') && text.ends_with('\n'));
        assert!(text.trim().lines().all(|line| line.len() <= 64));
        assert_eq!(strip_whitespace(&text), signed.certificate);
    }

    #[test]
    fn test_tampered_content_fails_verification() {
        let signed = signed();
        let tampered = signed.xml.replace("<vServ>100.00</vServ>", "<vServ>999.00</vServ>");
        assert_ne!(tampered, signed.xml);
        assert!(matches!(
            verify_signed_xml(&tampered),
            Err(EmissorError::SigningError { .. })
        ));
    }

    #[test]
    fn test_tampered_signature_value_fails_verification() {
        let signed = signed();
        let mut bad = signed.signature_value.clone().into_bytes();
        bad[10] = if bad[10] == b'A' { b'B' } else { b'A' };
        let tampered = signed
            .xml
            .replace(&signed.signature_value, std::str::from_utf8(&bad).unwrap());
        assert!(verify_signed_xml(&tampered).is_err());
    }

    #[test]
    fn test_crlf_text_verifies_after_line_end_normalization() {
        let mut request = sample_request();
        request.recipient = Some(crate::domain::model::Recipient::with_cpf("12345678900", "Ana\r\nSilva"));
        request.service.discriminacao = Some("linha 1\r\nlinha 2".to_string());
        let document = DpsBuilder::new().build(&request).unwrap();
        let signed = DpsSigner::new().sign(document, &credentials()).unwrap();

        assert!(!signed.xml.contains('\r'));
        assert!(signed.xml.contains("linha 1&#xD;\nlinha 2"));

        // what a receiver holds after transport on a CRLF platform
        let crlf = signed.xml.replace('\n', "\r\n");
        assert_eq!(verify_signed_xml(&crlf).unwrap().reference_id, signed.id);
        assert_eq!(verify_signed_xml(&signed.xml).unwrap().reference_id, signed.id);
    }

    #[test]
    fn test_expired_certificate_is_refused() {
        let document = DpsBuilder::new().build(&sample_request()).unwrap();
        let err = DpsSigner::new().sign(document, &expired_credentials()).unwrap_err();
        assert!(matches!(err, EmissorError::SigningError { .. }));
    }

    #[test]
    fn test_unsigned_document_is_rejected() {
        let document = DpsBuilder::new().build(&sample_request()).unwrap();
        let xml = to_document_string(&document.root).unwrap();
        assert!(verify_signed_xml(&xml).is_err());
    }
}
