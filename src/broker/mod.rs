// Brokerage access: REST client, order serialization channel.
pub mod channel;
pub mod rest;

pub use channel::{run_order_consumer, OrderChannel, OrderCommand};
pub use rest::RestBrokerClient;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("broker error response ({status}): {body}")]
    BadStatus { status: u16, body: String },

    #[error("retries exhausted after {0} attempts")]
    RetriesExhausted(u32),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("order channel closed")]
    ChannelClosed,
}

/// Result of an order placement or cancel call. `return_code == 0` is the
/// broker's success convention; any other code is a rejection, reported
/// here rather than as an `Err`.
#[derive(Debug, Clone)]
pub struct OrderResult {
    pub return_code: i32,
    pub order_no: String,
    pub message: String,
}

impl OrderResult {
    pub fn is_success(&self) -> bool {
        self.return_code == 0
    }
}

/// One held line in the account.
#[derive(Debug, Clone)]
pub struct AccountPosition {
    pub symbol: String,
    pub name: String,
    pub quantity: u32,
    pub purchase_price: i64,
    pub current_price: i64,
}

/// One day of the daily chart, newest first as the broker returns it.
#[derive(Debug, Clone)]
pub struct DailyCandle {
    pub date: String,
    pub open: i64,
    pub high: i64,
    pub low: i64,
    pub close: i64,
    pub volume: i64,
}

#[derive(Debug, Clone)]
pub struct AccountReturn {
    pub total_purchase: i64,
    pub total_value: i64,
    pub profit_rate: f64,
}

/// Async brokerage operations the engine depends on.
///
/// The REST implementation is the production path; tests substitute mocks.
pub trait BrokerClient: Send + Sync {
    fn place_buy_order(
        &self,
        symbol: &str,
        quantity: u32,
    ) -> impl std::future::Future<Output = Result<OrderResult, BrokerError>> + Send;

    fn place_sell_order(
        &self,
        symbol: &str,
        quantity: u32,
    ) -> impl std::future::Future<Output = Result<OrderResult, BrokerError>> + Send;

    /// `cancel_qty == 0` cancels all remaining quantity.
    fn cancel_order(
        &self,
        orig_order_no: &str,
        symbol: &str,
        cancel_qty: u32,
    ) -> impl std::future::Future<Output = Result<OrderResult, BrokerError>> + Send;

    fn account_positions(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<AccountPosition>, BrokerError>> + Send;

    fn deposit_balance(
        &self,
    ) -> impl std::future::Future<Output = Result<i64, BrokerError>> + Send;

    fn daily_chart(
        &self,
        symbol: &str,
        base_date: &str,
    ) -> impl std::future::Future<Output = Result<Vec<DailyCandle>, BrokerError>> + Send;

    fn account_return(
        &self,
    ) -> impl std::future::Future<Output = Result<AccountReturn, BrokerError>> + Send;
}
