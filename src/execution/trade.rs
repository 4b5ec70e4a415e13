use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{BuyFill, ExchangeClient};
use crate::execution::account::EntryPolicy;
use crate::market::{Pair, PairSnapshot};
use crate::models::{round_to, truncate_to, Horizon, SymbolInfo};

// ============================================================================
// Lifecycle constants
// ============================================================================

/// Take-profit / stop ratios of the protective bracket
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BracketRatios {
    pub take_profit: f64,
    pub stop: f64,
}

pub const SHORT_TERM_BRACKET: BracketRatios = BracketRatios {
    take_profit: 1.10,
    stop: 0.90,
};
pub const LONG_TERM_BRACKET: BracketRatios = BracketRatios {
    take_profit: 1.15,
    stop: 0.73,
};
pub const TOP_UP_BRACKET: BracketRatios = BracketRatios {
    take_profit: 1.15,
    stop: 0.85,
};

/// Stop-limit legs are priced just under their stop
const STOP_LIMIT_FACTOR: f64 = 0.999999999;

const SELL_MIN_GAIN: f64 = 1.01;
const MIN_TOP_UP_NOTIONAL: f64 = 10.0;
const MAX_TOP_UPS: u32 = 4;
const TOP_UP_MIN_ACCURACY: f64 = 0.5;
const TOP_UP_MAX_RATING_DROP: f64 = -0.1;

const LONG_TERM_PROMOTION_HOURS: i64 = 48;
const FAST_CADENCE_MS: i64 = 1_000;
const MEDIUM_CADENCE_SECS: i64 = 30;
const SLOW_CADENCE_HOURS: i64 = 24;

/// Trailing stop parameters for one horizon
struct TrailingRule {
    /// Price must exceed entry by this factor
    trigger: f64,
    /// Re-arm while the installed stop is below `last * margin`
    margin: f64,
    ratio: f64,
}

fn trailing_rule(horizon: Horizon) -> TrailingRule {
    match horizon {
        Horizon::ShortTerm => TrailingRule {
            trigger: 1.02,
            margin: 0.98,
            ratio: 0.015,
        },
        Horizon::LongTerm => TrailingRule {
            trigger: 1.12,
            margin: 0.97,
            ratio: 0.025,
        },
    }
}

// ============================================================================
// Trade record
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeState {
    /// Filled, no protective order acknowledged yet
    #[default]
    Entering,
    /// Bracket or trailing stop live on the exchange
    Protected,
    /// Protective order being replaced, or an exit sell is in flight
    Adjusting,
    /// Position no longer held; the trade leaves the account
    Closed,
}

/// What one evaluation did
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Idle,
    /// Held balance diverged from the recorded quantity
    Closed { profit: f64 },
    SellPlaced,
    TrailingStopMoved { stop: f64 },
    ToppedUp { old_price: f64, new_price: f64 },
}

/// An open position and its protective-order bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub symbol: String,
    /// Average entry price
    pub price: f64,
    pub quantity: f64,
    pub horizon: Horizon,
    pub buy_time: DateTime<Utc>,
    #[serde(default)]
    pub state: TradeState,
    pub initial_notional: f64,
    pub top_up_count: u32,
    pub current_order_id: Option<u64>,
    pub last_trailing_stop_price: f64,
    pub last_check_fast: DateTime<Utc>,
    pub last_check_medium: DateTime<Utc>,
    pub last_check_slow: DateTime<Utc>,
    /// Instrument as it was when the position was opened
    pub buy_pair: PairSnapshot,
}

/// Live collaborators for one evaluation
pub struct TickContext<'a> {
    pub exchange: &'a dyn ExchangeClient,
    pub pair: &'a Pair,
    pub entry: &'a EntryPolicy,
    /// Free + locked base asset
    pub held_base: f64,
    pub free_quote: f64,
    pub now: DateTime<Utc>,
}

impl Trade {
    /// Build a trade from a confirmed fill. No orders are placed.
    pub fn from_fill(pair: &Pair, fill: &BuyFill, horizon: Horizon, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: pair.symbol().to_string(),
            price: fill.avg_fill_price,
            quantity: fill.filled_qty,
            horizon,
            buy_time: now,
            state: TradeState::Entering,
            initial_notional: fill.avg_fill_price * fill.filled_qty,
            top_up_count: 0,
            current_order_id: None,
            last_trailing_stop_price: 0.0,
            last_check_fast: now,
            last_check_medium: now,
            last_check_slow: now,
            buy_pair: pair.snapshot(),
        }
    }

    pub fn info(&self) -> &SymbolInfo {
        &self.buy_pair.info
    }

    pub fn investment_value(&self) -> f64 {
        self.quantity * self.price
    }

    pub fn current_value(&self, last_price: f64) -> f64 {
        self.quantity * last_price
    }

    /// Bracket used right after entry
    pub fn entry_bracket(&self) -> BracketRatios {
        match self.horizon {
            Horizon::ShortTerm => SHORT_TERM_BRACKET,
            Horizon::LongTerm => LONG_TERM_BRACKET,
        }
    }

    /// Half a quantity step
    fn quantity_tolerance(&self) -> f64 {
        0.5 * 10f64.powi(-(self.info().quantity_precision as i32))
    }

    /// Fold a confirmed averaging fill into the position
    pub fn fold_fill(&mut self, fill: &BuyFill) {
        let total_cost = self.price * self.quantity + fill.avg_fill_price * fill.filled_qty;
        self.quantity += fill.filled_qty;
        self.price = total_cost / self.quantity;
        self.top_up_count += 1;
    }

    // ---- exchange actions (all best-effort) ----

    async fn cancel_current(&mut self, exchange: &dyn ExchangeClient) {
        if let Some(order_id) = self.current_order_id {
            match exchange.cancel_order(&self.symbol, order_id).await {
                Ok(()) => self.current_order_id = None,
                Err(e) => tracing::warn!(
                    symbol = %self.symbol,
                    order_id,
                    "Failed to cancel order: {}",
                    e
                ),
            }
        }
    }

    /// Replace any protective order with a one-cancels-other bracket around
    /// the average entry price
    pub async fn arm_bracket(&mut self, exchange: &dyn ExchangeClient, ratios: BracketRatios) -> bool {
        self.cancel_current(exchange).await;
        self.current_order_id = None;

        let precision = self.info().price_precision;
        let take_profit = round_to(self.price * ratios.take_profit, precision);
        let stop = round_to(self.price * ratios.stop, precision);
        let stop_limit = truncate_to(stop * STOP_LIMIT_FACTOR, precision);

        match exchange
            .place_oco_sell(&self.symbol, self.quantity, take_profit, stop, stop_limit)
            .await
        {
            Ok(ack) => {
                self.current_order_id = Some(ack.order_id);
                self.state = TradeState::Protected;
                tracing::info!(
                    "🛡️  {} bracket armed: take-profit ${} / stop ${} (limit ${})",
                    self.symbol,
                    take_profit,
                    stop,
                    stop_limit
                );
                true
            }
            Err(e) => {
                tracing::warn!(symbol = %self.symbol, "Failed to place bracket order: {}", e);
                false
            }
        }
    }

    /// Ratchet the stop to `base_price * (1 - ratio)` unless that is below
    /// the one already installed
    pub async fn setup_trailing_stop(
        &mut self,
        exchange: &dyn ExchangeClient,
        base_price: f64,
        ratio: f64,
    ) -> Option<f64> {
        let stop = round_to(base_price * (1.0 - ratio), self.info().price_precision);

        if self.last_trailing_stop_price > stop {
            return None;
        }

        self.state = TradeState::Adjusting;
        self.cancel_current(exchange).await;

        if self.place_stop(exchange, stop).await {
            self.last_trailing_stop_price = stop;
            tracing::info!("📈 {} trailing stop moved to ${}", self.symbol, stop);
            Some(stop)
        } else {
            // zero marker makes the next cycle retry
            self.last_trailing_stop_price = 0.0;
            None
        }
    }

    /// Stop-limit sell of the whole position at `stop`
    async fn place_stop(&mut self, exchange: &dyn ExchangeClient, stop: f64) -> bool {
        let limit = truncate_to(stop * STOP_LIMIT_FACTOR, self.info().price_precision);

        match exchange
            .place_stop_limit_sell(&self.symbol, self.quantity, stop, limit)
            .await
        {
            Ok(ack) => {
                self.current_order_id = Some(ack.order_id);
                self.state = TradeState::Protected;
                true
            }
            Err(e) => {
                tracing::warn!(symbol = %self.symbol, "Failed to place stop order: {}", e);
                false
            }
        }
    }

    /// Put a protective order back on a position that lost its own
    ///
    /// The last installed trailing stop is restored when there is one,
    /// otherwise (or when the exchange refuses it) the bracket matching the
    /// position: the entry one, or the top-up one once averaged.
    async fn restore_protection(&mut self, exchange: &dyn ExchangeClient) -> bool {
        let stop = self.last_trailing_stop_price;
        if stop > 0.0 && self.place_stop(exchange, stop).await {
            tracing::info!("🛡️  {} stop restored at ${}", self.symbol, stop);
            return true;
        }

        let ratios = if self.top_up_count > 0 {
            TOP_UP_BRACKET
        } else {
            self.entry_bracket()
        };
        self.arm_bracket(exchange, ratios).await
    }

    async fn place_exit(&mut self, exchange: &dyn ExchangeClient) -> bool {
        self.state = TradeState::Adjusting;
        self.cancel_current(exchange).await;

        match exchange.place_market_sell(&self.symbol, self.quantity).await {
            Ok(ack) => {
                self.current_order_id = Some(ack.order_id);
                true
            }
            Err(e) => {
                tracing::warn!(symbol = %self.symbol, "Failed to place market sell: {}", e);
                false
            }
        }
    }

    // ---- lifecycle ----

    /// Run one lifecycle evaluation
    ///
    /// Fast cadence (>1s): exit detection, protection retry, sell signal,
    /// trailing stop. Medium cadence (30s): timestamp only. Slow cadence (24h,
    /// long-term only): averaging top-up.
    pub async fn tick(&mut self, ctx: &TickContext<'_>) -> TickOutcome {
        let now = ctx.now;
        let last_price = ctx.pair.last_price().unwrap_or(self.price);

        if self.horizon == Horizon::ShortTerm
            && now - self.buy_time > Duration::hours(LONG_TERM_PROMOTION_HOURS)
        {
            tracing::info!("{} promoted to long-term after 48h", self.symbol);
            self.horizon = Horizon::LongTerm;
        }

        let mut outcome = TickOutcome::Idle;

        if now - self.last_check_fast > Duration::milliseconds(FAST_CADENCE_MS) {
            self.last_check_fast = now;

            if (ctx.held_base - self.quantity).abs() > self.quantity_tolerance() {
                let profit = self.current_value(last_price) - self.investment_value();
                self.state = TradeState::Closed;
                self.log_closure(ctx.pair, last_price, profit, now);
                return TickOutcome::Closed { profit };
            }

            // a placed exit sell keeps its order id and is left alone
            if self.current_order_id.is_none()
                && !matches!(self.state, TradeState::Protected | TradeState::Closed)
            {
                self.restore_protection(ctx.exchange).await;
            }

            if ctx.pair.sell_signal(self.horizon)
                && self.current_value(last_price) > self.investment_value() * SELL_MIN_GAIN
            {
                tracing::info!("💰 SELL SIGNAL: {} @ ${:.6}", self.symbol, last_price);
                self.place_exit(ctx.exchange).await;
                return TickOutcome::SellPlaced;
            }

            let rule = trailing_rule(self.horizon);
            if last_price > self.price * rule.trigger
                && (self.last_trailing_stop_price == 0.0
                    || self.last_trailing_stop_price < last_price * rule.margin)
            {
                if let Some(stop) = self
                    .setup_trailing_stop(ctx.exchange, last_price, rule.ratio)
                    .await
                {
                    outcome = TickOutcome::TrailingStopMoved { stop };
                }
            }
        }

        if now - self.last_check_medium > Duration::seconds(MEDIUM_CADENCE_SECS) {
            self.last_check_medium = now;
        }

        if self.horizon.is_long_term()
            && now - self.last_check_slow > Duration::hours(SLOW_CADENCE_HOURS)
        {
            if let Some(topped_up) = self.try_top_up(ctx, last_price).await {
                outcome = topped_up;
            }
        }

        outcome
    }

    /// Averaging buy raising the position value to its next target
    ///
    /// The n-th top-up (counting from 1) aims at `(n + 1) * initial_notional`,
    /// so the first one doubles the initial stake. At most four are made.
    async fn try_top_up(&mut self, ctx: &TickContext<'_>, last_price: f64) -> Option<TickOutcome> {
        let target = self.initial_notional * (self.top_up_count + 2) as f64;
        let notional = (target - self.current_value(last_price)).max(MIN_TOP_UP_NOTIONAL);

        if notional >= ctx.free_quote {
            return None;
        }

        let entry_rating = self.buy_pair.long_term_rating();
        let rating = ctx.pair.long_term_rating();
        if rating.accuracy <= TOP_UP_MIN_ACCURACY
            || rating.investment - entry_rating.investment <= TOP_UP_MAX_RATING_DROP
            || self.top_up_count >= MAX_TOP_UPS
        {
            return None;
        }

        let fill = ctx
            .entry
            .market_buy(ctx.exchange, &self.symbol, notional)
            .await?;

        self.state = TradeState::Adjusting;
        let old_price = self.price;
        self.fold_fill(&fill);
        tracing::info!(
            "({}) averaging top-up #{}: ${:.2} bought, price ${:.6} -> ${:.6}",
            self.symbol,
            self.top_up_count,
            notional,
            old_price,
            self.price
        );

        self.arm_bracket(ctx.exchange, TOP_UP_BRACKET).await;
        self.last_check_slow = ctx.now;

        Some(TickOutcome::ToppedUp {
            old_price,
            new_price: self.price,
        })
    }

    fn log_closure(&self, pair: &Pair, last_price: f64, profit: f64, now: DateTime<Utc>) {
        let investment = self.investment_value();
        let profit_pct = if investment > 0.0 {
            profit / investment * 100.0
        } else {
            0.0
        };

        tracing::info!(
            "🏁 Trade finished - {} [length: {}] [exit ~${:.6}]",
            self.symbol,
            format_duration(now - self.buy_time),
            last_price
        );
        tracing::info!("   profit made: {:.2}% (${:.4})", profit_pct, profit);
        tracing::info!(
            "   entry ratings: short {:.2} / long {:.2}",
            self.buy_pair.short_term_rating().investment,
            self.buy_pair.long_term_rating().investment
        );
        tracing::info!(
            "   current ratings: short {:.2} / long {:.2}",
            pair.short_term_rating().investment,
            pair.long_term_rating().investment
        );
        tracing::info!("   long-term: {}", self.horizon.is_long_term());
    }
}

/// "2d 3h 4m", "5m 10s"
pub fn format_duration(duration: Duration) -> String {
    let total = duration.num_seconds().max(0);
    let (days, hours, minutes, seconds) = (
        total / 86_400,
        total % 86_400 / 3_600,
        total % 3_600 / 60,
        total % 60,
    );

    if days > 0 {
        format!("{}d {}h {}m", days, hours, minutes)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m {}s", minutes, seconds)
    }
}
