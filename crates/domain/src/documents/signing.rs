//! Signing tokens and buyer signature submissions.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use common::{DocType, SignMethod};
use rand::Rng;
use thiserror::Error;

use super::snapshots::sha256_hex;

/// Consent recorded with every buyer signature.
pub const BUYER_CONSENT_TEXT: &str =
    "I agree to sign this document electronically and accept its terms as binding.";

/// Consent recorded when the company countersigns.
pub const EXECUTION_CONSENT_TEXT: &str = "Executed electronically by Rizara.";

const MAX_SIGNER_NAME: usize = 120;
const MAX_USER_AGENT: usize = 255;

/// Why a public signing request was turned away.
///
/// Messages stay generic; they go to unauthenticated callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SigningError {
    #[error("This signing link is invalid")]
    InvalidToken,

    #[error("This document has already been signed")]
    AlreadySigned,

    #[error("This signing link has expired")]
    Expired,

    #[error("This document is no longer available for signing")]
    Unavailable,

    #[error("{0}")]
    Invalid(String),
}

/// Returns a fresh URL-safe token carrying 256 bits of randomness.
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::thread_rng().r#gen();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// The form a token is stored in.
pub fn hash_token(token: &str) -> String {
    sha256_hex(token.as_bytes())
}

/// What the buyer submits on the public signing page.
#[derive(Debug, Clone, Default)]
pub struct SignatureSubmission {
    pub signer_name: String,
    pub signer_email: Option<String>,
    pub consent: bool,
    pub sign_method: Option<SignMethod>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// A submission that passed validation.
#[derive(Debug, Clone)]
pub(crate) struct ValidSignature {
    pub name: String,
    pub email: Option<String>,
    pub method: SignMethod,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl SignatureSubmission {
    pub(crate) fn validate(self, doc_type: DocType) -> Result<ValidSignature, SigningError> {
        let name = self.signer_name.trim().to_string();
        if name.is_empty() {
            return Err(SigningError::Invalid("Signer name is required".to_string()));
        }
        if name.chars().count() > MAX_SIGNER_NAME {
            return Err(SigningError::Invalid(format!(
                "Signer name must be at most {MAX_SIGNER_NAME} characters"
            )));
        }
        if !self.consent {
            return Err(SigningError::Invalid(
                "You must consent to sign electronically".to_string(),
            ));
        }

        let email = self
            .signer_email
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty());
        match &email {
            None if doc_type.requires_signer_email() => {
                return Err(SigningError::Invalid("Signer email is required".to_string()));
            }
            Some(e) if !looks_like_email(e) => {
                return Err(SigningError::Invalid("Signer email is invalid".to_string()));
            }
            _ => {}
        }

        let method = match self.sign_method.unwrap_or(SignMethod::Typed) {
            SignMethod::Docusign => {
                return Err(SigningError::Invalid(
                    "Unsupported signing method".to_string(),
                ));
            }
            method => method,
        };

        Ok(ValidSignature {
            name,
            email,
            method,
            ip_address: self.ip_address.filter(|ip| !ip.trim().is_empty()),
            user_agent: self
                .user_agent
                .map(|ua| ua.chars().take(MAX_USER_AGENT).collect()),
        })
    }
}

fn looks_like_email(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission() -> SignatureSubmission {
        SignatureSubmission {
            signer_name: "  Amina Yusuf ".to_string(),
            signer_email: Some("amina@gulf.example".to_string()),
            consent: true,
            ..SignatureSubmission::default()
        }
    }

    #[test]
    fn test_tokens_are_unique_and_url_safe() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_hash_token_is_stable_hex() {
        let hash = hash_token("abc");
        assert_eq!(hash, hash_token("abc"));
        assert_eq!(hash.len(), 64);
        assert_ne!(hash, hash_token("abd"));
    }

    #[test]
    fn test_valid_submission_is_normalized() {
        let valid = submission().validate(DocType::ExportSalesContract).unwrap();
        assert_eq!(valid.name, "Amina Yusuf");
        assert_eq!(valid.method, SignMethod::Typed);
    }

    #[test]
    fn test_consent_is_required() {
        let sub = SignatureSubmission {
            consent: false,
            ..submission()
        };
        assert!(matches!(sub.validate(DocType::Loi), Err(SigningError::Invalid(_))));
    }

    #[test]
    fn test_email_required_only_for_export_contracts() {
        let sub = SignatureSubmission {
            signer_email: None,
            ..submission()
        };
        assert!(sub.clone().validate(DocType::Loi).is_ok());
        assert!(matches!(
            sub.validate(DocType::ExportSalesContract),
            Err(SigningError::Invalid(_))
        ));
    }

    #[test]
    fn test_name_length_and_method_rules() {
        let long = SignatureSubmission {
            signer_name: "x".repeat(121),
            ..submission()
        };
        assert!(long.validate(DocType::Loi).is_err());

        let docusign = SignatureSubmission {
            sign_method: Some(SignMethod::Docusign),
            ..submission()
        };
        assert!(docusign.validate(DocType::Loi).is_err());

        let drawn = SignatureSubmission {
            sign_method: Some(SignMethod::Drawn),
            user_agent: Some("a".repeat(400)),
            ..submission()
        };
        let valid = drawn.validate(DocType::Loi).unwrap();
        assert_eq!(valid.method, SignMethod::Drawn);
        assert_eq!(valid.user_agent.unwrap().len(), 255);
    }
}
