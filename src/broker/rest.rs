use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;

use super::{AccountPosition, AccountReturn, BrokerClient, BrokerError, DailyCandle, OrderResult};

const RATE_LIMIT_RPS: u32 = 5;
const MAX_RETRIES: u32 = 3;
const MAX_AUTH_RETRIES: u32 = 3;
const MARKET_ORDER: &str = "3";
const KRX: &str = "KRX";

type DirectRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// REST brokerage client.
///
/// Cloneable; all clones share one rate limiter so the account-wide request
/// budget holds no matter how many tasks hold a handle.
#[derive(Clone)]
pub struct RestBrokerClient {
    client: Client,
    host: String,
    token: String,
    rate_limiter: Arc<DirectRateLimiter>,
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    grant_type: &'a str,
    appkey: &'a str,
    secretkey: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    return_code: i32,
    #[serde(default)]
    return_msg: String,
    #[serde(default)]
    token: Option<String>,
}

#[derive(Debug, Serialize)]
struct OrderRequest<'a> {
    dmst_stex_tp: &'a str,
    stk_cd: &'a str,
    ord_qty: String,
    ord_uv: &'a str,
    trde_tp: &'a str,
    cond_uv: &'a str,
}

#[derive(Debug, Serialize)]
struct CancelRequest<'a> {
    dmst_stex_tp: &'a str,
    orig_ord_no: &'a str,
    stk_cd: &'a str,
    cncl_qty: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    return_code: i32,
    #[serde(default)]
    return_msg: String,
    #[serde(default)]
    ord_no: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccountInfoResponse {
    return_code: i32,
    #[serde(default)]
    return_msg: String,
    #[serde(default)]
    acnt_evlt_remn_indv_tot: Vec<RawPosition>,
}

#[derive(Debug, Deserialize)]
struct RawPosition {
    #[serde(default)]
    stk_cd: String,
    #[serde(default)]
    stk_nm: String,
    #[serde(default)]
    rmnd_qty: String,
    #[serde(default)]
    pur_pric: String,
    #[serde(default)]
    cur_prc: String,
}

#[derive(Debug, Deserialize)]
struct DepositResponse {
    return_code: i32,
    #[serde(default)]
    return_msg: String,
    #[serde(default)]
    entr: String,
}

#[derive(Debug, Deserialize)]
struct DailyChartResponse {
    return_code: i32,
    #[serde(default)]
    return_msg: String,
    #[serde(default)]
    stk_dt_pole_chart_qry: Vec<RawDailyCandle>,
}

#[derive(Debug, Deserialize)]
struct RawDailyCandle {
    #[serde(default)]
    dt: String,
    #[serde(default)]
    open_pric: String,
    #[serde(default)]
    high_pric: String,
    #[serde(default)]
    low_pric: String,
    #[serde(default)]
    cur_prc: String,
    #[serde(default)]
    trde_qty: String,
}

#[derive(Debug, Deserialize)]
struct AccountReturnResponse {
    return_code: i32,
    #[serde(default)]
    return_msg: String,
    #[serde(default)]
    tot_pur_amt: String,
    #[serde(default)]
    tot_evlt_amt: String,
    #[serde(default)]
    prft_rt: String,
}

impl RestBrokerClient {
    /// Authenticate against the broker and build a client.
    ///
    /// Auth failure after the retry budget is fatal to the caller; there is
    /// no unauthenticated mode.
    pub async fn connect(
        host: &str,
        app_key: &str,
        secret_key: &str,
    ) -> Result<Self, BrokerError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;

        let quota = Quota::per_second(NonZeroU32::new(RATE_LIMIT_RPS).expect("nonzero"));
        let rate_limiter = Arc::new(RateLimiter::direct(quota));

        let body = TokenRequest {
            grant_type: "client_credentials",
            appkey: app_key,
            secretkey: secret_key,
        };

        let mut last_error = String::new();
        for attempt in 1..=MAX_AUTH_RETRIES {
            let response = client
                .post(format!("{}/oauth2/token", host))
                .json(&body)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    let parsed: TokenResponse = resp.json().await?;
                    if parsed.return_code == 0 {
                        if let Some(token) = parsed.token {
                            tracing::info!("🔑 Broker auth OK at {}", host);
                            return Ok(Self {
                                client,
                                host: host.to_string(),
                                token,
                                rate_limiter,
                            });
                        }
                    }
                    last_error = format!("return_code {}: {}", parsed.return_code, parsed.return_msg);
                }
                Ok(resp) => {
                    last_error = format!("status {}", resp.status());
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }

            let backoff = 2u64.pow(attempt);
            tracing::warn!(
                "Broker auth failed ({}), retrying in {}s (attempt {}/{})",
                last_error,
                backoff,
                attempt,
                MAX_AUTH_RETRIES
            );
            tokio::time::sleep(std::time::Duration::from_secs(backoff)).await;
        }

        Err(BrokerError::Auth(last_error))
    }

    /// Test constructor that skips the auth handshake.
    pub fn with_token(host: &str, token: &str) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(RATE_LIMIT_RPS).expect("nonzero"));
        Self {
            client: Client::new(),
            host: host.to_string(),
            token: token.to_string(),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    /// Rate-limited POST with retry on 429/5xx, parsed into `T`.
    async fn api_call<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        api_id: &str,
        body: &B,
    ) -> Result<T, BrokerError> {
        let url = format!("{}{}", self.host, path);

        for attempt in 1..=MAX_RETRIES {
            self.rate_limiter.until_ready().await;

            let response = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.token))
                .header("api-id", api_id)
                .json(body)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp.json::<T>().await?);
                    }
                    if status.as_u16() == 429 || status.is_server_error() {
                        let backoff = 2u64.pow(attempt);
                        tracing::warn!(
                            "{} returned {}, retrying in {}s (attempt {}/{})",
                            api_id,
                            status,
                            backoff,
                            attempt,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(std::time::Duration::from_secs(backoff)).await;
                        continue;
                    }
                    let text = resp.text().await.unwrap_or_default();
                    return Err(BrokerError::BadStatus {
                        status: status.as_u16(),
                        body: text,
                    });
                }
                Err(e) if attempt < MAX_RETRIES => {
                    let backoff = 2u64.pow(attempt);
                    tracing::warn!(
                        "{} network error: {}, retrying in {}s (attempt {}/{})",
                        api_id,
                        e,
                        backoff,
                        attempt,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(backoff)).await;
                }
                Err(e) => return Err(BrokerError::Http(e)),
            }
        }

        Err(BrokerError::RetriesExhausted(MAX_RETRIES))
    }

    async fn place_order(
        &self,
        api_id: &str,
        symbol: &str,
        quantity: u32,
    ) -> Result<OrderResult, BrokerError> {
        let body = OrderRequest {
            dmst_stex_tp: KRX,
            stk_cd: symbol,
            ord_qty: quantity.to_string(),
            ord_uv: "",
            trde_tp: MARKET_ORDER,
            cond_uv: "",
        };
        let resp: OrderResponse = self.api_call("/api/dostk/ordr", api_id, &body).await?;
        Ok(OrderResult {
            return_code: resp.return_code,
            order_no: resp.ord_no.unwrap_or_default(),
            message: resp.return_msg,
        })
    }
}

impl BrokerClient for RestBrokerClient {
    async fn place_buy_order(
        &self,
        symbol: &str,
        quantity: u32,
    ) -> Result<OrderResult, BrokerError> {
        let result = self.place_order("kt10000", symbol, quantity).await?;
        if result.is_success() {
            tracing::info!("📈 매수주문 {} {}주, 주문번호 {}", symbol, quantity, result.order_no);
        }
        Ok(result)
    }

    async fn place_sell_order(
        &self,
        symbol: &str,
        quantity: u32,
    ) -> Result<OrderResult, BrokerError> {
        let result = self.place_order("kt10001", symbol, quantity).await?;
        if result.is_success() {
            tracing::info!("📉 매도주문 {} {}주, 주문번호 {}", symbol, quantity, result.order_no);
        }
        Ok(result)
    }

    async fn cancel_order(
        &self,
        orig_order_no: &str,
        symbol: &str,
        cancel_qty: u32,
    ) -> Result<OrderResult, BrokerError> {
        let body = CancelRequest {
            dmst_stex_tp: KRX,
            orig_ord_no: orig_order_no,
            stk_cd: symbol,
            cncl_qty: cancel_qty.to_string(),
        };
        let resp: OrderResponse = self.api_call("/api/dostk/ordr", "kt10003", &body).await?;
        Ok(OrderResult {
            return_code: resp.return_code,
            order_no: resp.ord_no.unwrap_or_else(|| orig_order_no.to_string()),
            message: resp.return_msg,
        })
    }

    async fn account_positions(&self) -> Result<Vec<AccountPosition>, BrokerError> {
        let body = serde_json::json!({ "qry_tp": "1", "dmst_stex_tp": "K" });
        let resp: AccountInfoResponse = self.api_call("/api/dostk/acnt", "kt00018", &body).await?;
        if resp.return_code != 0 {
            tracing::warn!("account query rejected: {}", resp.return_msg);
            return Ok(Vec::new());
        }

        Ok(resp
            .acnt_evlt_remn_indv_tot
            .into_iter()
            .filter_map(|raw| {
                Some(AccountPosition {
                    // Position codes arrive with an exchange prefix ("A005930").
                    symbol: raw.stk_cd.trim_start_matches('A').to_string(),
                    name: raw.stk_nm,
                    quantity: parse_amount(&raw.rmnd_qty)? as u32,
                    purchase_price: parse_amount(&raw.pur_pric)?,
                    current_price: parse_amount(&raw.cur_prc)?,
                })
            })
            .collect())
    }

    async fn deposit_balance(&self) -> Result<i64, BrokerError> {
        let body = serde_json::json!({ "qry_tp": "2" });
        let resp: DepositResponse = self.api_call("/api/dostk/acnt", "kt00001", &body).await?;
        if resp.return_code != 0 {
            tracing::warn!("deposit query rejected: {}", resp.return_msg);
            return Ok(0);
        }
        Ok(parse_amount(&resp.entr).unwrap_or(0))
    }

    async fn daily_chart(
        &self,
        symbol: &str,
        base_date: &str,
    ) -> Result<Vec<DailyCandle>, BrokerError> {
        let body = serde_json::json!({
            "stk_cd": symbol,
            "base_dt": base_date,
            "upd_stkpc_tp": "1",
        });
        let resp: DailyChartResponse = self.api_call("/api/dostk/chart", "ka10081", &body).await?;
        if resp.return_code != 0 {
            tracing::warn!("daily chart rejected for {}: {}", symbol, resp.return_msg);
            return Ok(Vec::new());
        }

        Ok(resp
            .stk_dt_pole_chart_qry
            .into_iter()
            .filter_map(|raw| {
                Some(DailyCandle {
                    date: raw.dt,
                    open: parse_amount(&raw.open_pric)?,
                    high: parse_amount(&raw.high_pric)?,
                    low: parse_amount(&raw.low_pric)?,
                    close: parse_amount(&raw.cur_prc)?,
                    volume: parse_amount(&raw.trde_qty).unwrap_or(0),
                })
            })
            .collect())
    }

    async fn account_return(&self) -> Result<AccountReturn, BrokerError> {
        let body = serde_json::json!({ "stex_tp": "0" });
        let resp: AccountReturnResponse = self.api_call("/api/dostk/acnt", "ka10085", &body).await?;
        Ok(AccountReturn {
            total_purchase: parse_amount(&resp.tot_pur_amt).unwrap_or(0),
            total_value: parse_amount(&resp.tot_evlt_amt).unwrap_or(0),
            profit_rate: resp.prft_rt.trim().parse::<f64>().unwrap_or(0.0),
        })
    }
}

/// Broker numerics arrive as strings with sign prefixes and zero padding.
fn parse_amount(raw: &str) -> Option<i64> {
    let trimmed = raw.trim().trim_start_matches('+');
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<i64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("+0000071500"), Some(71_500));
        assert_eq!(parse_amount("-2500"), Some(-2_500));
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("abc"), None);
    }

    #[tokio::test]
    async fn test_place_buy_order_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/dostk/ordr")
            .match_header("api-id", "kt10000")
            .with_status(200)
            .with_body(r#"{"return_code":0,"return_msg":"정상처리","ord_no":"0000138"}"#)
            .create_async()
            .await;

        let client = RestBrokerClient::with_token(&server.url(), "test-token");
        let result = client.place_buy_order("005930", 10).await.unwrap();

        assert!(result.is_success());
        assert_eq!(result.order_no, "0000138");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejected_order_is_not_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/dostk/ordr")
            .with_status(200)
            .with_body(r#"{"return_code":8,"return_msg":"주문가능금액 부족"}"#)
            .create_async()
            .await;

        let client = RestBrokerClient::with_token(&server.url(), "test-token");
        let result = client.place_sell_order("005930", 10).await.unwrap();

        assert!(!result.is_success());
        assert_eq!(result.return_code, 8);
        assert!(result.message.contains("부족"));
    }

    #[tokio::test]
    async fn test_client_error_does_not_retry() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/dostk/acnt")
            .with_status(403)
            .with_body("forbidden")
            .expect(1)
            .create_async()
            .await;

        let client = RestBrokerClient::with_token(&server.url(), "bad-token");
        let result = client.deposit_balance().await;

        assert!(matches!(result, Err(BrokerError::BadStatus { status: 403, .. })));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_account_positions_parsing() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/dostk/acnt")
            .match_header("api-id", "kt00018")
            .with_status(200)
            .with_body(
                r#"{"return_code":0,"return_msg":"","acnt_evlt_remn_indv_tot":[
                    {"stk_cd":"A005930","stk_nm":"삼성전자","rmnd_qty":"0000000010","pur_pric":"0000070000","cur_prc":"+0000071500"},
                    {"stk_cd":"A000660","stk_nm":"SK하이닉스","rmnd_qty":"0000000030","pur_pric":"0000120000","cur_prc":"-0000119000"}
                ]}"#,
            )
            .create_async()
            .await;

        let client = RestBrokerClient::with_token(&server.url(), "test-token");
        let positions = client.account_positions().await.unwrap();

        assert_eq!(positions.len(), 2);
        assert_eq!(positions[0].symbol, "005930");
        assert_eq!(positions[0].quantity, 10);
        assert_eq!(positions[0].current_price, 71_500);
        assert_eq!(positions[1].symbol, "000660");
        assert_eq!(positions[1].current_price, -119_000);
    }

    #[tokio::test]
    async fn test_deposit_balance_parsing() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/dostk/acnt")
            .match_header("api-id", "kt00001")
            .with_status(200)
            .with_body(r#"{"return_code":0,"return_msg":"","entr":"000050000000"}"#)
            .create_async()
            .await;

        let client = RestBrokerClient::with_token(&server.url(), "test-token");
        assert_eq!(client.deposit_balance().await.unwrap(), 50_000_000);
    }

    #[tokio::test]
    async fn test_daily_chart_parsing() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/dostk/chart")
            .match_header("api-id", "ka10081")
            .with_status(200)
            .with_body(
                r#"{"return_code":0,"return_msg":"","stk_dt_pole_chart_qry":[
                    {"dt":"20260826","open_pric":"70500","high_pric":"71900","low_pric":"70100","cur_prc":"71500","trde_qty":"12345678"},
                    {"dt":"20260825","open_pric":"70000","high_pric":"70800","low_pric":"69500","cur_prc":"70400","trde_qty":"9876543"}
                ]}"#,
            )
            .create_async()
            .await;

        let client = RestBrokerClient::with_token(&server.url(), "test-token");
        let chart = client.daily_chart("005930", "20260826").await.unwrap();

        assert_eq!(chart.len(), 2);
        assert_eq!(chart[0].close, 71_500);
        assert_eq!(chart[1].date, "20260825");
    }

    #[tokio::test]
    async fn test_cancel_order_all_remaining() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/dostk/ordr")
            .match_header("api-id", "kt10003")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"orig_ord_no":"0000138","cncl_qty":"0"}"#.to_string(),
            ))
            .with_status(200)
            .with_body(r#"{"return_code":0,"return_msg":"","ord_no":"0000139"}"#)
            .create_async()
            .await;

        let client = RestBrokerClient::with_token(&server.url(), "test-token");
        let result = client.cancel_order("0000138", "005930", 0).await.unwrap();

        assert!(result.is_success());
        mock.assert_async().await;
    }
}
