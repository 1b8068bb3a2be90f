//! `gwi key` handlers.

use chrono::Utc;

use crate::cli::context::AppContext;
use crate::cli::output;
use crate::domain::models::approval::SigningKeyRecord;
use crate::infrastructure::crypto::{encode_private_key, encode_public_key, generate_keypair};

use super::CliError;

pub async fn handle_generate(
    ctx: &AppContext,
    key_id: &str,
    out: &str,
    json: bool,
) -> Result<(), CliError> {
    if key_id.trim().is_empty() {
        return Err(CliError::Validation("key id cannot be empty".to_string()));
    }

    let (signing_key, verifying_key) = generate_keypair();
    let record = SigningKeyRecord {
        key_id: key_id.to_string(),
        tenant_id: ctx.config.worker.tenant_id.clone(),
        algorithm: SigningKeyRecord::ALGORITHM_ED25519.to_string(),
        public_key: encode_public_key(&verifying_key),
        revoked: false,
        created_at: Utc::now(),
        revoked_at: None,
    };
    ctx.key_store.register(&record).await?;

    std::fs::write(out, encode_private_key(&signing_key))
        .map_err(|e| CliError::Store(format!("cannot write key file {out}: {e}")))?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&record)
                .map_err(|e| CliError::Store(e.to_string()))?
        );
    } else {
        output::success(&format!(
            "key {key_id} registered; private key written to {out}"
        ));
    }
    Ok(())
}

pub async fn handle_revoke(ctx: &AppContext, key_id: &str, json: bool) -> Result<(), CliError> {
    ctx.key_store
        .revoke(key_id)
        .await
        .map_err(|e| CliError::Signature(e.to_string()))?;
    if json {
        println!("{}", serde_json::json!({"key_id": key_id, "revoked": true}));
    } else {
        output::success(&format!("key {key_id} revoked"));
    }
    Ok(())
}

pub async fn handle_list(ctx: &AppContext, json: bool) -> Result<(), CliError> {
    let keys = ctx
        .key_store
        .list(&ctx.config.worker.tenant_id)
        .await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&keys)
                .map_err(|e| CliError::Store(e.to_string()))?
        );
    } else if keys.is_empty() {
        println!("no signing keys registered");
    } else {
        for key in &keys {
            println!(
                "{}  {}  {}  {}",
                key.key_id,
                key.algorithm,
                if key.revoked { "revoked" } else { "active" },
                key.created_at.format("%Y-%m-%d %H:%M:%S"),
            );
        }
    }
    Ok(())
}
