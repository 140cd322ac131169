use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use spotlink_core::*;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::{Credentials, ExchangeConfig};
use crate::protocol::*;
use crate::signer::{signature_payload, Signer};

const API_KEY_HEADER: &str = "X-MBX-APIKEY";

/// REST client for one Binance environment.
///
/// Public endpoints work without credentials; keyed and signed endpoints
/// fail with [`GatewayError::Configuration`] when none were supplied.
pub struct BinanceClient {
    config: ExchangeConfig,
    http: Client,
    api_key: Option<String>,
    signer: Signer,
}

impl BinanceClient {
    pub fn new(config: ExchangeConfig, credentials: Option<Credentials>) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| GatewayError::Configuration(format!("HTTP client: {}", e)))?;
        let (api_key, secret) = match credentials {
            Some(c) => (Some(c.api_key), Some(c.secret_key)),
            None => (None, None),
        };
        Ok(Self {
            config,
            http,
            api_key,
            signer: Signer::new(secret),
        })
    }

    /// Client for public market data only.
    pub fn public(config: ExchangeConfig) -> Result<Self, GatewayError> {
        Self::new(config, None)
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    fn api_key(&self) -> Result<&str, GatewayError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| GatewayError::Configuration("API key is required for this endpoint".to_string()))
    }

    fn keyed(&self, method: Method, endpoint: &str) -> Result<RequestBuilder, GatewayError> {
        let api_key = self.api_key()?;
        Ok(self
            .http
            .request(method, self.config.rest_url(endpoint))
            .header(API_KEY_HEADER, api_key))
    }

    /// Build a signed GET: `timestamp` plus an HMAC `signature` over the query.
    fn signed_get(&self, endpoint: &str) -> Result<RequestBuilder, GatewayError> {
        let query = format!("timestamp={}", Utc::now().timestamp_millis());
        let signature = self.signer.sign(&signature_payload(&query, None))?;
        let url = format!(
            "{}?{}&signature={}",
            self.config.rest_url(endpoint),
            query,
            signature
        );
        Ok(self.http.get(url).header(API_KEY_HEADER, self.api_key()?))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, GatewayError> {
        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        check_status(response).await
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, GatewayError> {
        let response = self.send(request).await?;
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::Transport(format!("reading body: {}", e)))?;
        parse_body(&body)
    }
}

async fn check_status(response: Response) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(GatewayError::Exchange {
        status: status.as_u16(),
        body,
    })
}

fn parse_body<T: DeserializeOwned>(body: &str) -> Result<T, GatewayError> {
    serde_json::from_str(body).map_err(|e| {
        let snippet: String = body.chars().take(200).collect();
        GatewayError::Decode(format!("{} (body: {})", e, snippet))
    })
}

#[async_trait]
impl ExchangeGateway for BinanceClient {
    async fn fetch_account_snapshot(&self) -> Result<BalanceMap, GatewayError> {
        let account: AccountResponse = self.send_json(self.signed_get("account")?).await?;
        let balances = account.into_balance_map();
        debug!(assets = balances.len(), "Fetched account snapshot");
        Ok(balances)
    }

    async fn issue_session_token(&self) -> Result<SessionToken, GatewayError> {
        let response: ListenKeyResponse = self
            .send_json(self.keyed(Method::POST, "userDataStream")?)
            .await?;
        let token = SessionToken::new(response.listen_key);
        if token.is_empty() {
            return Err(GatewayError::Decode(
                "userDataStream returned an empty listenKey".to_string(),
            ));
        }
        Ok(token)
    }

    async fn renew_session_token(&self, token: &SessionToken) -> Result<(), GatewayError> {
        let request = self
            .keyed(Method::PUT, "userDataStream")?
            .query(&[("listenKey", token.as_str())]);
        self.send(request).await?;
        Ok(())
    }

    async fn fetch_24h_stats(&self) -> Result<Vec<TickerStats>, GatewayError> {
        let tickers: Vec<Ticker24h> = self
            .send_json(self.http.get(self.config.rest_url("ticker/24hr")))
            .await?;
        Ok(tickers.into_iter().map(TickerStats::from).collect())
    }

    async fn fetch_symbol_metadata(&self) -> Result<Vec<SymbolInfo>, GatewayError> {
        let info: ExchangeInfoResponse = self
            .send_json(self.http.get(self.config.rest_url("exchangeInfo")))
            .await?;
        Ok(info.symbols.into_iter().map(SymbolInfo::from).collect())
    }

    async fn probe(&self) -> Result<Duration, GatewayError> {
        let started = Instant::now();
        // `send` resolves once the status line and headers have arrived.
        let response = self
            .http
            .get(self.config.rest_url("ping"))
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        let ttfb = started.elapsed();
        let response = check_status(response).await?;
        // Drain the (empty) body so the connection can be reused.
        let _ = response.bytes().await;
        Ok(ttfb)
    }
}
