/*
 * Solana chain client: balances, signing, submission and confirmation
 */

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signer, SigningKey};
use num_bigint::BigUint;
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};
use crate::models::{Chain, GatewayError, Result, TokenDescriptor};
use crate::rpc::solana::{
    ConfirmedTransactionResponse, SolanaRpcClient, TransactionTokenBalance, TOKEN_2022_PROGRAM_ID,
    TOKEN_PROGRAM_ID,
};
use crate::utils::{is_solana_address, raw_str_to_decimal, raw_to_decimal};
use super::{
    BalanceEntry, BalanceWatch, ChainClient, ConfirmationPolicy, ConfirmedTransaction,
    UnsignedTransaction, WalletKeys,
};

/// Wrapped SOL mint, used as the address of native SOL throughout the gateway.
pub const NATIVE_MINT: &str = "So11111111111111111111111111111111111111112";
pub const SOL_DECIMALS: u8 = 9;

const SIGNATURE_LEN: usize = 64;
const PUBKEY_LEN: usize = 32;
const VERSIONED_PREFIX: u8 = 0x80;

pub struct SolanaChain {
    network: String,
    rpc: SolanaRpcClient,
    wallets: Arc<WalletKeys>,
    fee_buffer: Decimal,
    policy: ConfirmationPolicy,
}

impl SolanaChain {
    pub fn new(
        network: &str,
        rpc: SolanaRpcClient,
        wallets: Arc<WalletKeys>,
        fee_buffer: Decimal,
        policy: ConfirmationPolicy,
    ) -> Self {
        Self {
            network: network.to_string(),
            rpc,
            wallets,
            fee_buffer,
            policy,
        }
    }

    async fn wait_for_confirmation(&self, signature: &str) -> Result<()> {
        let poll = async {
            loop {
                match self.rpc.get_signature_status(signature).await {
                    Ok(Some(status)) if status.err.is_some() => {
                        let err = status.err.map(|e| e.to_string()).unwrap_or_default();
                        return Err(GatewayError::rejected(err, Some(signature.to_string())));
                    }
                    Ok(Some(status)) if status.is_confirmed() => return Ok(()),
                    Ok(_) => debug!("Transaction {} not confirmed yet", signature),
                    // The transaction is already out; keep polling until the deadline.
                    Err(e) => warn!("Status poll for {} failed: {}", signature, e),
                }
                tokio::time::sleep(self.policy.poll_interval).await;
            }
        };

        tokio::time::timeout(self.policy.timeout, poll)
            .await
            .map_err(|_| GatewayError::TransactionError {
                message: format!(
                    "Transaction not confirmed within {}s",
                    self.policy.timeout.as_secs()
                ),
                signature: Some(signature.to_string()),
                timeout: true,
            })?
    }

    async fn token_balances(&self, wallet: &str) -> Result<HashMap<String, (u128, u8)>> {
        let mut totals: HashMap<String, (u128, u8)> = HashMap::new();
        for program in [TOKEN_PROGRAM_ID, TOKEN_2022_PROGRAM_ID] {
            for account in self.rpc.get_token_accounts_by_owner(wallet, program).await? {
                let amount = account.amount.parse::<u128>().map_err(|e| {
                    GatewayError::RpcError(format!("Invalid token amount {}: {e}", account.amount))
                })?;
                let entry = totals.entry(account.mint).or_insert((0, account.decimals));
                entry.0 += amount;
            }
        }
        Ok(totals)
    }
}

#[async_trait]
impl ChainClient for SolanaChain {
    fn chain(&self) -> Chain {
        Chain::Solana
    }

    fn network(&self) -> &str {
        &self.network
    }

    fn native_token(&self) -> TokenDescriptor {
        TokenDescriptor {
            address: NATIVE_MINT.to_string(),
            symbol: "SOL".to_string(),
            name: Some("Solana".to_string()),
            decimals: SOL_DECIMALS,
        }
    }

    fn native_fee_buffer(&self) -> Decimal {
        self.fee_buffer
    }

    async fn get_balances(
        &self,
        wallet: &str,
        tokens: &[TokenDescriptor],
    ) -> Result<HashMap<String, Decimal>> {
        if !is_solana_address(wallet) {
            return Err(GatewayError::BadRequest(format!("Invalid Solana address: {wallet}")));
        }

        let mut balances = HashMap::with_capacity(tokens.len());
        let needs_tokens = tokens.iter().any(|t| !self.is_native(t));
        let token_accounts = if needs_tokens {
            self.token_balances(wallet).await?
        } else {
            HashMap::new()
        };

        for token in tokens {
            let balance = if self.is_native(token) {
                let lamports = self.rpc.get_balance(wallet).await?;
                Decimal::new(i64::try_from(lamports).unwrap_or(i64::MAX), u32::from(SOL_DECIMALS))
            } else {
                match token_accounts.get(&token.address) {
                    Some((raw, decimals)) => raw_to_decimal(&BigUint::from(*raw), *decimals)?,
                    None => Decimal::ZERO,
                }
            };
            balances.insert(token.symbol.clone(), balance);
        }
        Ok(balances)
    }

    async fn send_and_confirm(&self, tx: UnsignedTransaction, wallet: &str) -> Result<String> {
        let UnsignedTransaction::Solana { serialized } = tx else {
            return Err(GatewayError::Internal(
                "EVM transaction submitted to a Solana client".to_string(),
            ));
        };

        let key = self.wallets.solana_signer(wallet)?;
        let signed = sign_serialized_transaction(&serialized, key)?;
        let signature = self.rpc.send_transaction(&BASE64.encode(signed)).await?;
        info!("Submitted Solana transaction {} on {}", signature, self.network);

        self.wait_for_confirmation(&signature).await?;
        info!("Transaction {} confirmed", signature);
        Ok(signature)
    }

    async fn get_confirmed_transaction(
        &self,
        signature: &str,
        _watch: &[BalanceWatch],
    ) -> Result<ConfirmedTransaction> {
        let response = self
            .rpc
            .get_transaction(signature)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("Transaction {signature} not found")))?;
        normalize_transaction(signature, &response)
    }
}

/// Flattens native and token balances of a `getTransaction` response into
/// per-owner entries. SOL entries use the wrapped SOL mint as their token.
pub fn normalize_transaction(
    signature: &str,
    response: &ConfirmedTransactionResponse,
) -> Result<ConfirmedTransaction> {
    let meta = response.meta.as_ref().ok_or_else(|| {
        GatewayError::NotFound(format!("Transaction {signature} has no metadata"))
    })?;
    let keys = response.account_keys();
    let fee_payer = keys.first().cloned().unwrap_or_default();

    let mut balances = Vec::new();
    for (index, owner) in keys.iter().enumerate() {
        let (Some(pre), Some(post)) = (meta.pre_balances.get(index), meta.post_balances.get(index))
        else {
            continue;
        };
        balances.push(BalanceEntry {
            owner: owner.clone(),
            token: NATIVE_MINT.to_string(),
            native: true,
            pre: lamports_to_sol(*pre),
            post: lamports_to_sol(*post),
        });
    }

    let by_index = |list: &[TransactionTokenBalance]| -> HashMap<usize, TransactionTokenBalance> {
        list.iter().map(|b| (b.account_index, b.clone())).collect()
    };
    let pre_tokens = by_index(&meta.pre_token_balances);
    let post_tokens = by_index(&meta.post_token_balances);
    let indexes: BTreeSet<usize> = pre_tokens.keys().chain(post_tokens.keys()).copied().collect();

    for index in indexes {
        let pre = pre_tokens.get(&index);
        let post = post_tokens.get(&index);
        let Some(reference) = post.or(pre) else {
            continue;
        };
        let Some(owner) = post.and_then(|b| b.owner.clone()).or_else(|| pre.and_then(|b| b.owner.clone()))
        else {
            debug!("Token account {} in {} has no owner, skipping", index, signature);
            continue;
        };
        let amount = |b: Option<&TransactionTokenBalance>| -> Result<Decimal> {
            b.map_or(Ok(Decimal::ZERO), |b| {
                raw_str_to_decimal(&b.ui_token_amount.amount, b.ui_token_amount.decimals)
            })
        };
        balances.push(BalanceEntry {
            owner,
            token: reference.mint.clone(),
            native: false,
            pre: amount(pre)?,
            post: amount(post)?,
        });
    }

    Ok(ConfirmedTransaction {
        signature: signature.to_string(),
        fee: lamports_to_sol(meta.fee),
        fee_payer,
        error: meta.err.as_ref().map(ToString::to_string),
        balances,
        logs: Vec::new(),
    })
}

fn lamports_to_sol(lamports: u64) -> Decimal {
    Decimal::from(lamports) / Decimal::from(1_000_000_000u64)
}

/// Decodes a compact-u16 length prefix, returning the value and its size.
fn decode_compact_u16(bytes: &[u8]) -> Result<(usize, usize)> {
    let mut value = 0usize;
    for (i, byte) in bytes.iter().take(3).enumerate() {
        value |= usize::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(GatewayError::BadRequest("Malformed transaction length prefix".to_string()))
}

/// Places `key`'s signature in its slot of a serialized legacy or v0
/// transaction. The slot is the key's position among the required signers.
pub fn sign_serialized_transaction(serialized: &[u8], key: &SigningKey) -> Result<Vec<u8>> {
    let malformed = || GatewayError::provider("Provider returned a malformed transaction");

    let (num_signatures, prefix_len) = decode_compact_u16(serialized)?;
    let message_start = prefix_len + num_signatures * SIGNATURE_LEN;
    let message = serialized.get(message_start..).ok_or_else(malformed)?;

    let mut offset = usize::from(message.first().is_some_and(|b| b & VERSIONED_PREFIX != 0));
    let num_required = usize::from(*message.get(offset).ok_or_else(malformed)?);
    offset += 3;
    let (num_keys, keys_prefix) = decode_compact_u16(message.get(offset..).ok_or_else(malformed)?)?;
    offset += keys_prefix;

    let pubkey = key.verifying_key().to_bytes();
    let slot = (0..num_required.min(num_keys).min(num_signatures))
        .find(|i| {
            let start = offset + i * PUBKEY_LEN;
            message.get(start..start + PUBKEY_LEN) == Some(&pubkey[..])
        })
        .ok_or_else(|| {
            GatewayError::BadRequest(format!(
                "Transaction does not require a signature from {}",
                bs58::encode(pubkey).into_string()
            ))
        })?;

    let signature = key.sign(message);
    let mut signed = serialized.to_vec();
    let start = prefix_len + slot * SIGNATURE_LEN;
    signed[start..start + SIGNATURE_LEN].copy_from_slice(&signature.to_bytes());
    Ok(signed)
}
