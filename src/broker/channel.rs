use crate::models::OrderSide;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, Instant};

use super::{BrokerClient, BrokerError, OrderResult};

/// One queued order placement with its reply slot.
pub struct OrderCommand {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: u32,
    reply: oneshot::Sender<Result<OrderResult, BrokerError>>,
}

/// Sending half of the order queue.
///
/// All order placements funnel through one bounded channel; a single
/// consumer task dequeues them with a minimum spacing, so bursts of signals
/// across symbols never stack concurrent order calls at the broker.
#[derive(Clone)]
pub struct OrderChannel {
    tx: mpsc::Sender<OrderCommand>,
}

impl OrderChannel {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<OrderCommand>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Queue an order and wait for the broker's reply.
    pub async fn place(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: u32,
    ) -> Result<OrderResult, BrokerError> {
        let (reply, response) = oneshot::channel();
        let command = OrderCommand {
            symbol: symbol.to_string(),
            side,
            quantity,
            reply,
        };
        self.tx
            .send(command)
            .await
            .map_err(|_| BrokerError::ChannelClosed)?;
        response.await.map_err(|_| BrokerError::ChannelClosed)?
    }
}

/// Consume queued orders one at a time with a minimum interval between
/// broker calls. Runs until every `OrderChannel` handle is dropped.
pub async fn run_order_consumer<C: BrokerClient>(
    client: C,
    mut rx: mpsc::Receiver<OrderCommand>,
    min_interval: Duration,
) {
    let mut last_call: Option<Instant> = None;

    while let Some(command) = rx.recv().await {
        if let Some(at) = last_call {
            let elapsed = at.elapsed();
            if elapsed < min_interval {
                tokio::time::sleep(min_interval - elapsed).await;
            }
        }

        let result = match command.side {
            OrderSide::Buy => client.place_buy_order(&command.symbol, command.quantity).await,
            OrderSide::Sell => client.place_sell_order(&command.symbol, command.quantity).await,
        };
        last_call = Some(Instant::now());

        if command.reply.send(result).is_err() {
            tracing::warn!(
                "order reply for {} dropped, caller went away",
                command.symbol
            );
        }
    }

    tracing::info!("order consumer shutting down, channel closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{AccountPosition, AccountReturn, DailyCandle};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingBroker {
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl BrokerClient for RecordingBroker {
        async fn place_buy_order(
            &self,
            symbol: &str,
            quantity: u32,
        ) -> Result<OrderResult, BrokerError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("buy {} {}", symbol, quantity));
            Ok(OrderResult {
                return_code: 0,
                order_no: "0000001".to_string(),
                message: String::new(),
            })
        }

        async fn place_sell_order(
            &self,
            symbol: &str,
            quantity: u32,
        ) -> Result<OrderResult, BrokerError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("sell {} {}", symbol, quantity));
            Ok(OrderResult {
                return_code: 0,
                order_no: "0000002".to_string(),
                message: String::new(),
            })
        }

        async fn cancel_order(
            &self,
            _orig_order_no: &str,
            _symbol: &str,
            _cancel_qty: u32,
        ) -> Result<OrderResult, BrokerError> {
            unreachable!("cancels do not go through the order channel")
        }

        async fn account_positions(&self) -> Result<Vec<AccountPosition>, BrokerError> {
            Ok(Vec::new())
        }

        async fn deposit_balance(&self) -> Result<i64, BrokerError> {
            Ok(0)
        }

        async fn daily_chart(
            &self,
            _symbol: &str,
            _base_date: &str,
        ) -> Result<Vec<DailyCandle>, BrokerError> {
            Ok(Vec::new())
        }

        async fn account_return(&self) -> Result<AccountReturn, BrokerError> {
            Ok(AccountReturn {
                total_purchase: 0,
                total_value: 0,
                profit_rate: 0.0,
            })
        }
    }

    #[tokio::test]
    async fn test_orders_flow_through_in_sequence() {
        let broker = RecordingBroker::default();
        let calls = broker.calls.clone();
        let (channel, rx) = OrderChannel::new(16);
        let consumer = tokio::spawn(run_order_consumer(broker, rx, Duration::from_millis(0)));

        let buy = channel.place("005930", OrderSide::Buy, 150).await.unwrap();
        assert!(buy.is_success());
        let sell = channel.place("000660", OrderSide::Sell, 30).await.unwrap();
        assert!(sell.is_success());
        assert_eq!(sell.order_no, "0000002");

        assert_eq!(
            *calls.lock().unwrap(),
            vec!["buy 005930 150".to_string(), "sell 000660 30".to_string()]
        );

        drop(channel);
        consumer.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_minimum_spacing_between_orders() {
        let broker = RecordingBroker::default();
        let (channel, rx) = OrderChannel::new(16);
        tokio::spawn(run_order_consumer(broker, rx, Duration::from_secs(1)));

        let start = Instant::now();
        channel.place("005930", OrderSide::Buy, 10).await.unwrap();
        channel.place("005930", OrderSide::Sell, 10).await.unwrap();

        // The second order waits out the minimum interval.
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_closed_channel_surfaces_error() {
        let (channel, rx) = OrderChannel::new(1);
        drop(rx);

        let result = channel.place("005930", OrderSide::Buy, 10).await;
        assert!(matches!(result, Err(BrokerError::ChannelClosed)));
    }
}
