use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use secp256k1::{PublicKey, Scalar, Secp256k1};
use serde::Serialize;
use sha2::Sha256;

use crate::error::{Error, Result};
use crate::models::PaymailP4;
use crate::tx::Tx;

const PKI_ROTATION: &str = "0";

/// Derivation key of the paymail identity key for `alias@domain`.
pub fn pki_derivation_key(alias: &str, domain: &str) -> String {
    format!("1-paymail_pki-{alias}@{domain}_{PKI_ROTATION}")
}

/// Derive the public key a paymail publishes for an owner.
///
/// Type-42 derivation against the "anyone" counterparty (private key 1):
/// `child = pub + HMAC-SHA256(pub, invoice)·G`. Returns the key together
/// with the derivation key used.
pub fn paymail_pki(pub_key: &PublicKey, alias: &str, domain: &str) -> Result<(PublicKey, String)> {
    if alias.is_empty() || domain.is_empty() {
        return Err(Error::KeyDerivation(
            "alias and domain are required to derive a paymail key".into(),
        ));
    }
    let derivation_key = pki_derivation_key(alias, domain);
    let child = derive_child(pub_key, &derivation_key)?;
    Ok((child, derivation_key))
}

pub fn derive_child(pub_key: &PublicKey, invoice: &str) -> Result<PublicKey> {
    let mut mac = Hmac::<Sha256>::new_from_slice(&pub_key.serialize())
        .map_err(|e| Error::KeyDerivation(e.to_string()))?;
    mac.update(invoice.as_bytes());
    let tweak: [u8; 32] = mac.finalize().into_bytes().into();
    let scalar =
        Scalar::from_be_bytes(tweak).map_err(|e| Error::KeyDerivation(e.to_string()))?;
    let secp = Secp256k1::verification_only();
    pub_key
        .add_exp_tweak(&secp, &scalar)
        .map_err(|e| Error::KeyDerivation(e.to_string()))
}

/// Tells a recipient's paymail host about a transaction paying it.
#[async_trait]
pub trait PaymailNotifier: Send + Sync {
    async fn notify(
        &self,
        address: &str,
        p2p: &PaymailP4,
        reference: &str,
        tx: &Tx,
    ) -> std::result::Result<(), String>;
}

#[derive(Serialize)]
struct P2pMetadata<'a> {
    sender: &'a str,
    #[serde(skip_serializing_if = "is_blank")]
    note: &'a str,
}

fn is_blank(s: &&str) -> bool {
    s.is_empty()
}

#[derive(Serialize)]
struct P2pTransactionBody<'a> {
    hex: String,
    reference: &'a str,
    metadata: P2pMetadata<'a>,
}

/// [`PaymailNotifier`] posting to the P2P receive-transaction endpoint.
#[derive(Debug, Clone)]
pub struct PaymailP2pClient {
    http: Client,
}

impl PaymailP2pClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("paymail http client: {e}")))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl PaymailNotifier for PaymailP2pClient {
    async fn notify(
        &self,
        address: &str,
        p2p: &PaymailP4,
        reference: &str,
        tx: &Tx,
    ) -> std::result::Result<(), String> {
        if p2p.receive_endpoint.is_empty() {
            return Err(format!("no P2P receive endpoint for {address}"));
        }
        let body = P2pTransactionBody {
            hex: tx.to_hex(),
            reference,
            metadata: P2pMetadata {
                sender: &p2p.from_paymail,
                note: &p2p.note,
            },
        };
        let response = self
            .http
            .post(&p2p.receive_endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("P2P notification to {address} failed: {e}"))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(format!(
                "P2P notification to {address} returned {status}: {}",
                text.trim()
            ));
        }
        log::debug!("paymail: notified {address} about {}", tx.txid());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secp256k1::SecretKey;

    fn sample_pub() -> PublicKey {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[0x42; 32]).unwrap();
        PublicKey::from_secret_key(&secp, &sk)
    }

    #[test]
    fn derivation_key_format() {
        assert_eq!(
            pki_derivation_key("alice", "example.com"),
            "1-paymail_pki-alice@example.com_0"
        );
    }

    #[test]
    fn derivation_is_deterministic_and_per_paymail() {
        let pub_key = sample_pub();
        let (a1, key) = paymail_pki(&pub_key, "alice", "example.com").unwrap();
        let (a2, _) = paymail_pki(&pub_key, "alice", "example.com").unwrap();
        let (b, _) = paymail_pki(&pub_key, "bob", "example.com").unwrap();
        assert_eq!(a1, a2);
        assert_ne!(a1, b);
        assert_ne!(a1, pub_key);
        assert_eq!(key, "1-paymail_pki-alice@example.com_0");
    }

    #[test]
    fn child_matches_private_derivation() {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[0x42; 32]).unwrap();
        let pub_key = PublicKey::from_secret_key(&secp, &sk);
        let invoice = pki_derivation_key("alice", "example.com");

        let mut mac = Hmac::<Sha256>::new_from_slice(&pub_key.serialize()).unwrap();
        mac.update(invoice.as_bytes());
        let tweak: [u8; 32] = mac.finalize().into_bytes().into();
        let child_sk = sk.add_tweak(&Scalar::from_be_bytes(tweak).unwrap()).unwrap();

        assert_eq!(
            derive_child(&pub_key, &invoice).unwrap(),
            PublicKey::from_secret_key(&secp, &child_sk)
        );
    }

    #[test]
    fn empty_alias_or_domain_rejected() {
        let pub_key = sample_pub();
        assert!(matches!(
            paymail_pki(&pub_key, "", "example.com"),
            Err(Error::KeyDerivation(_))
        ));
        assert!(matches!(
            paymail_pki(&pub_key, "alice", ""),
            Err(Error::KeyDerivation(_))
        ));
    }
}
