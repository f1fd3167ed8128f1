//! Exchange order client.
//!
//! Orders are built as the exchange's EIP-712 `Order` struct, signed with the
//! local key and posted with L2 (API key) authentication headers.

use std::borrow::Cow;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::{address, Address, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use alloy::sol;
use alloy::sol_types::{Eip712Domain, SolStruct};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::config::Credentials;
use crate::order::{l2_signature, OrderError, OrderRequest, OrderResponse, OrderSubmitter, OrderType, Side};

/// Polygon mainnet.
pub const POLYGON_CHAIN_ID: u64 = 137;
/// CTF exchange contract.
const CTF_EXCHANGE: Address = address!("4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E");
/// Negative-risk CTF exchange contract.
const NEG_RISK_CTF_EXCHANGE: Address = address!("C5d563A36AE78145C45a50134d48A1215220f80a");
/// Orders are signed on behalf of a proxy wallet.
const SIGNATURE_TYPE_PROXY: u8 = 1;
const ORDER_PATH: &str = "/order";
/// Upper bound on one order POST, connect included.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

sol! {
    #[derive(Debug)]
    struct Order {
        uint256 salt;
        address maker;
        address signer;
        address taker;
        uint256 tokenId;
        uint256 makerAmount;
        uint256 takerAmount;
        uint256 expiration;
        uint256 nonce;
        uint256 feeRateBps;
        uint8 side;
        uint8 signatureType;
    }
}

/// Signing domain of the exchange contract.
fn exchange_domain(neg_risk: bool) -> Eip712Domain {
    Eip712Domain {
        name: Some(Cow::Borrowed("Polymarket CTF Exchange")),
        version: Some(Cow::Borrowed("1")),
        chain_id: Some(U256::from(POLYGON_CHAIN_ID)),
        verifying_contract: Some(if neg_risk { NEG_RISK_CTF_EXCHANGE } else { CTF_EXCHANGE }),
        salt: None,
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignedOrderJson {
    salt: u64,
    maker: String,
    signer: String,
    taker: String,
    token_id: String,
    maker_amount: String,
    taker_amount: String,
    expiration: String,
    nonce: String,
    fee_rate_bps: String,
    side: Side,
    signature_type: u8,
    signature: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PostOrderBody {
    defer_exec: bool,
    order: SignedOrderJson,
    owner: String,
    order_type: OrderType,
}

/// Authenticated order client.
pub struct ClobClient {
    client: Client,
    base_url: String,
    signer: PrivateKeySigner,
    proxy: Address,
    api_key: String,
    api_secret: SecretString,
    api_passphrase: SecretString,
}

impl ClobClient {
    /// Create a client from credentials.
    pub fn new(base_url: &str, credentials: &Credentials) -> Result<Self, OrderError> {
        let signer = PrivateKeySigner::from_str(credentials.private_key.expose_secret())
            .map_err(|e| OrderError::Signing(format!("invalid private key: {}", e)))?
            .with_chain_id(Some(POLYGON_CHAIN_ID));

        let proxy = Address::from_str(&credentials.proxy_address)
            .map_err(|e| OrderError::Signing(format!("invalid proxy address: {}", e)))?;

        tracing::info!(address = %signer.address(), proxy = %proxy, "Initialized order client");

        Ok(Self {
            client: http_client(REQUEST_TIMEOUT)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            signer,
            proxy,
            api_key: credentials.api_key.clone(),
            api_secret: credentials.api_secret.clone(),
            api_passphrase: credentials.api_passphrase.clone(),
        })
    }

    /// Replace the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, OrderError> {
        self.client = http_client(timeout)?;
        Ok(self)
    }

    async fn build_body(&self, request: &OrderRequest) -> Result<PostOrderBody, OrderError> {
        let prepared = request.prepare()?;
        let now = Utc::now();
        let (expiration, order_type) = request.expiration(now);
        let salt = now.timestamp_millis() as u64;

        let token_id = U256::from_str_radix(&request.asset_id, 10)
            .map_err(|e| OrderError::Invalid(format!("token id {}: {}", request.asset_id, e)))?;
        let expiration_value = U256::from_str_radix(&expiration, 10)
            .map_err(|e| OrderError::Invalid(format!("expiration {}: {}", expiration, e)))?;

        let order = Order {
            salt: U256::from(salt),
            maker: self.proxy,
            signer: self.signer.address(),
            taker: Address::ZERO,
            tokenId: token_id,
            makerAmount: U256::from(prepared.maker_amount),
            takerAmount: U256::from(prepared.taker_amount),
            expiration: expiration_value,
            nonce: U256::ZERO,
            feeRateBps: U256::ZERO,
            side: match request.side {
                Side::Buy => 0,
                Side::Sell => 1,
            },
            signatureType: SIGNATURE_TYPE_PROXY,
        };

        let hash = order.eip712_signing_hash(&exchange_domain(request.neg_risk));
        let signature = self
            .signer
            .sign_hash(&hash)
            .await
            .map_err(|e| OrderError::Signing(e.to_string()))?;

        Ok(PostOrderBody {
            defer_exec: false,
            order: SignedOrderJson {
                salt,
                maker: self.proxy.to_string(),
                signer: self.signer.address().to_string(),
                taker: Address::ZERO.to_string(),
                token_id: request.asset_id.clone(),
                maker_amount: prepared.maker_amount.to_string(),
                taker_amount: prepared.taker_amount.to_string(),
                expiration,
                nonce: "0".to_string(),
                fee_rate_bps: "0".to_string(),
                side: request.side,
                signature_type: SIGNATURE_TYPE_PROXY,
                signature: signature.to_string(),
            },
            owner: self.api_key.clone(),
            order_type,
        })
    }
}

#[async_trait]
impl OrderSubmitter for ClobClient {
    async fn submit_order(&self, request: &OrderRequest) -> Result<String, OrderError> {
        let body = self.build_body(request).await?;
        let body = serde_json::to_string(&body).map_err(|e| OrderError::Invalid(e.to_string()))?;

        let timestamp = Utc::now().timestamp();
        let signature = l2_signature(
            self.api_secret.expose_secret(),
            timestamp,
            "POST",
            ORDER_PATH,
            &body,
        )?;

        let response = self
            .client
            .post(format!("{}{}", self.base_url, ORDER_PATH))
            .header("Content-Type", "application/json")
            .header("POLY_ADDRESS", self.signer.address().to_string())
            .header("POLY_API_KEY", &self.api_key)
            .header("POLY_PASSPHRASE", self.api_passphrase.expose_secret())
            .header("POLY_SIGNATURE", signature)
            .header("POLY_TIMESTAMP", timestamp.to_string())
            .body(body)
            .send()
            .await
            .map_err(|e| OrderError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(OrderError::Http(format!("{}: {}", status, text)));
        }

        let parsed: OrderResponse = response
            .json()
            .await
            .map_err(|e| OrderError::Http(e.to_string()))?;

        if !parsed.success {
            return Err(OrderError::Rejected(parsed.error_msg));
        }

        tracing::info!(
            order_id = %parsed.order_id,
            slug = %request.slug,
            side = request.side.as_str(),
            price = %request.limit,
            size = %request.size,
            status = %parsed.status,
            "Order placed"
        );
        Ok(parsed.order_id)
    }
}

fn http_client(timeout: Duration) -> Result<Client, OrderError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| OrderError::Http(e.to_string()))
}

/// Logs orders instead of sending them.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunSubmitter;

#[async_trait]
impl OrderSubmitter for DryRunSubmitter {
    async fn submit_order(&self, request: &OrderRequest) -> Result<String, OrderError> {
        let prepared = request.prepare()?;
        let fake_id = format!("dry_run_{}", Utc::now().timestamp_millis());
        tracing::info!(
            order_id = %fake_id,
            slug = %request.slug,
            token_id = %request.asset_id,
            side = request.side.as_str(),
            price = %prepared.limit,
            size = %prepared.size,
            expiry = request.expiry_secs,
            "[DRY RUN] Would place order"
        );
        Ok(fake_id)
    }
}
