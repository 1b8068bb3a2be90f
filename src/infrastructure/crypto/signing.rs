//! Approval signing and verification (ed25519).
//!
//! The signature covers the canonical byte form of the approval with the
//! `signature` field removed. Verification also checks key registry
//! state: a missing, revoked, or non-ed25519 key rejects the approval.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

use crate::domain::error::ApprovalError;
use crate::domain::models::approval::{SignedApproval, SigningKeyRecord};

use super::canonical::canonical_json;

/// The canonical bytes an approval signature covers.
pub fn approval_signing_bytes(approval: &SignedApproval) -> Vec<u8> {
    let mut value = serde_json::to_value(approval)
        .unwrap_or(serde_json::Value::Null);
    if let Some(map) = value.as_object_mut() {
        map.remove("signature");
    }
    canonical_json(&value).into_bytes()
}

/// Sign an approval in place with the given private key.
pub fn sign_approval(approval: &mut SignedApproval, signing_key: &SigningKey) {
    approval.signature = String::new();
    let bytes = approval_signing_bytes(approval);
    let signature = signing_key.sign(&bytes);
    approval.signature = BASE64.encode(signature.to_bytes());
}

/// Verify an approval against a registered public key.
pub fn verify_approval(
    approval: &SignedApproval,
    key: &SigningKeyRecord,
) -> Result<(), ApprovalError> {
    if key.revoked {
        return Err(ApprovalError::KeyRevoked(key.key_id.clone()));
    }
    if key.algorithm != SigningKeyRecord::ALGORITHM_ED25519 {
        return Err(ApprovalError::UnsupportedAlgorithm(key.algorithm.clone()));
    }

    let public_bytes = BASE64
        .decode(&key.public_key)
        .map_err(|e| ApprovalError::MalformedKeyMaterial(key.key_id.clone(), e.to_string()))?;
    let public_bytes: [u8; 32] = public_bytes.as_slice().try_into().map_err(|_| {
        ApprovalError::MalformedKeyMaterial(key.key_id.clone(), "expected 32 bytes".to_string())
    })?;
    let verifying_key = VerifyingKey::from_bytes(&public_bytes)
        .map_err(|e| ApprovalError::MalformedKeyMaterial(key.key_id.clone(), e.to_string()))?;

    let signature_bytes = BASE64
        .decode(&approval.signature)
        .map_err(|_| ApprovalError::SignatureInvalid(approval.approval_id))?;
    let signature = Signature::from_slice(&signature_bytes)
        .map_err(|_| ApprovalError::SignatureInvalid(approval.approval_id))?;

    let mut unsigned = approval.clone();
    unsigned.signature = String::new();
    let bytes = approval_signing_bytes(&unsigned);

    verifying_key
        .verify(&bytes, &signature)
        .map_err(|_| ApprovalError::SignatureInvalid(approval.approval_id))
}

/// Generate a fresh ed25519 keypair.
pub fn generate_keypair() -> (SigningKey, VerifyingKey) {
    let signing_key = SigningKey::generate(&mut OsRng);
    let verifying_key = signing_key.verifying_key();
    (signing_key, verifying_key)
}

/// Base64 form of a public key, as stored in the key registry.
pub fn encode_public_key(key: &VerifyingKey) -> String {
    BASE64.encode(key.to_bytes())
}

/// Base64 form of a private key, as written to key files.
pub fn encode_private_key(key: &SigningKey) -> String {
    BASE64.encode(key.to_bytes())
}

/// Decode a base64 private key.
pub fn decode_private_key(encoded: &str) -> Result<SigningKey, ApprovalError> {
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|e| ApprovalError::MalformedKeyMaterial("private".to_string(), e.to_string()))?;
    let bytes: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
        ApprovalError::MalformedKeyMaterial("private".to_string(), "expected 32 bytes".to_string())
    })?;
    Ok(SigningKey::from_bytes(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::approval::{
        ApprovalDecision, ApprovalTarget, Approver, ApproverRole, Scope,
    };
    use chrono::Utc;
    use uuid::Uuid;

    fn key_record(verifying_key: &VerifyingKey, revoked: bool) -> SigningKeyRecord {
        SigningKeyRecord {
            key_id: "k-test".to_string(),
            tenant_id: "t-1".to_string(),
            algorithm: SigningKeyRecord::ALGORITHM_ED25519.to_string(),
            public_key: encode_public_key(verifying_key),
            revoked,
            created_at: Utc::now(),
            revoked_at: None,
        }
    }

    fn approval() -> SignedApproval {
        SignedApproval {
            approval_id: Uuid::new_v4(),
            tenant_id: "t-1".to_string(),
            approver: Approver {
                approver_type: "user".to_string(),
                id: "u-2".to_string(),
                email: Some("u2@example.com".to_string()),
            },
            approver_role: ApproverRole::Maintainer,
            decision: ApprovalDecision::Approved,
            scopes_approved: vec![Scope::Commit, Scope::Push],
            target: ApprovalTarget::Run {
                run_id: Uuid::new_v4(),
            },
            intent_hash: "abc123".to_string(),
            reason: None,
            source: "cli".to_string(),
            signing_key_id: "k-test".to_string(),
            signature: String::new(),
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    #[test]
    fn sign_then_verify() {
        let (sk, vk) = generate_keypair();
        let mut a = approval();
        sign_approval(&mut a, &sk);
        verify_approval(&a, &key_record(&vk, false)).unwrap();
    }

    #[test]
    fn tampering_breaks_the_signature() {
        let (sk, vk) = generate_keypair();
        let mut a = approval();
        sign_approval(&mut a, &sk);

        a.scopes_approved.push(Scope::Deploy);
        let err = verify_approval(&a, &key_record(&vk, false)).unwrap_err();
        assert!(matches!(err, ApprovalError::SignatureInvalid(_)));
    }

    #[test]
    fn revoked_key_rejects() {
        let (sk, vk) = generate_keypair();
        let mut a = approval();
        sign_approval(&mut a, &sk);

        let err = verify_approval(&a, &key_record(&vk, true)).unwrap_err();
        assert!(matches!(err, ApprovalError::KeyRevoked(_)));
    }

    #[test]
    fn unsupported_algorithm_rejects() {
        let (sk, vk) = generate_keypair();
        let mut a = approval();
        sign_approval(&mut a, &sk);

        let mut rec = key_record(&vk, false);
        rec.algorithm = "rsa".to_string();
        let err = verify_approval(&a, &rec).unwrap_err();
        assert!(matches!(err, ApprovalError::UnsupportedAlgorithm(_)));
    }

    #[test]
    fn wrong_key_rejects() {
        let (sk, _) = generate_keypair();
        let (_, other_vk) = generate_keypair();
        let mut a = approval();
        sign_approval(&mut a, &sk);

        let err = verify_approval(&a, &key_record(&other_vk, false)).unwrap_err();
        assert!(matches!(err, ApprovalError::SignatureInvalid(_)));
    }

    #[test]
    fn private_key_round_trips() {
        let (sk, _) = generate_keypair();
        let decoded = decode_private_key(&encode_private_key(&sk)).unwrap();
        assert_eq!(sk.to_bytes(), decoded.to_bytes());
    }
}
