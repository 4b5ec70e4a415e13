use std::sync::Arc;

use crate::config::EntrySettings;
use crate::execution::Account;
use crate::market::Pair;
use crate::models::Horizon;
use crate::strategy::Rating;

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionAction {
    Buy { notional: f64, horizon: Horizon },
    Skip,
}

#[derive(Debug, Clone)]
pub struct ExecutionDecision {
    pub action: ExecutionAction,
    pub reason: String,
}

impl ExecutionDecision {
    fn skip(reason: impl Into<String>) -> Self {
        Self {
            action: ExecutionAction::Skip,
            reason: reason.into(),
        }
    }
}

/// Account facts an entry depends on
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionCheck {
    pub has_trade: bool,
    pub free_quote: f64,
    /// Free + locked base asset
    pub held_base: f64,
}

/// Entry side of the decision loop
pub struct Executor {
    account: Arc<Account>,
    settings: EntrySettings,
}

impl Executor {
    pub fn new(account: Arc<Account>, settings: EntrySettings) -> Self {
        Self { account, settings }
    }

    /// Both ratings must clear their gate before any entry is considered
    pub fn passes_gate(&self, short: &Rating, long: &Rating) -> bool {
        short.investment >= self.settings.short_gate_investment
            && long.investment >= self.settings.long_gate_investment
    }

    fn qualifies(&self, horizon: Horizon, rating: &Rating) -> bool {
        match horizon {
            Horizon::ShortTerm => {
                rating.accuracy > self.settings.short_min_accuracy
                    && rating.investment > self.settings.short_min_investment
            }
            Horizon::LongTerm => {
                rating.accuracy > self.settings.long_min_accuracy
                    && rating.investment > self.settings.long_min_investment
            }
        }
    }

    fn notional(&self, horizon: Horizon) -> f64 {
        match horizon {
            Horizon::ShortTerm => self.settings.short_notional,
            Horizon::LongTerm => self.settings.long_notional,
        }
    }

    /// Decide whether to open a `horizon` trade
    ///
    /// # Arguments
    /// * `rating` - The pair's rating for that horizon
    /// * `check` - Current account state for the pair
    pub fn evaluate_entry(
        &self,
        horizon: Horizon,
        rating: &Rating,
        check: &PositionCheck,
    ) -> ExecutionDecision {
        if !self.qualifies(horizon, rating) {
            return ExecutionDecision::skip(format!(
                "Rating too weak (accuracy {:.2}, investment {:.2})",
                rating.accuracy, rating.investment
            ));
        }

        if check.has_trade {
            return ExecutionDecision::skip("Already have open trade");
        }

        let notional = self.notional(horizon);
        if check.free_quote <= notional {
            return ExecutionDecision::skip(format!(
                "Insufficient free balance ({:.2} <= {:.2})",
                check.free_quote, notional
            ));
        }

        if check.held_base != 0.0 {
            return ExecutionDecision::skip("Base asset already held");
        }

        ExecutionDecision {
            action: ExecutionAction::Buy { notional, horizon },
            reason: format!(
                "accuracy {:.2}, investment {:.2}, pattern {:?} ({} bars ago), book {:.2}",
                rating.accuracy,
                rating.investment,
                rating.pattern,
                rating.distance,
                rating.order_book_ratio
            ),
        }
    }

    async fn position_check(&self, pair: &Pair) -> PositionCheck {
        PositionCheck {
            has_trade: self.account.has_trade(pair.symbol()).await,
            free_quote: self.account.free_balance(self.account.quote_asset()).await,
            held_base: self.account.total_balance(pair.base_asset()).await,
        }
    }

    /// One pass of the decision loop over every instrument
    ///
    /// Returns the number of trades opened.
    pub async fn scan_once(&self) -> usize {
        let summary = self.account.portfolio_summary().await;
        tracing::info!(
            "📊 [Investment Value: {:.3}] [Current Value: {:.3}] [Unrealised Profit: {:.3}] [Session Profit: {:.3}] [Open Trades: {}]",
            summary.investment_value,
            summary.current_value,
            summary.unrealised_profit,
            summary.session_profit,
            summary.open_trades
        );

        if let Err(e) = self.account.refresh_balances().await {
            tracing::warn!("Balance refresh failed, skipping decision pass: {}", e);
            return 0;
        }

        let mut opened = 0;
        for pair in self.account.markets().iter() {
            if !pair.klines_ready() {
                continue;
            }

            let short = pair.short_term_rating();
            let long = pair.long_term_rating();
            if !self.passes_gate(&short, &long) {
                continue;
            }

            for (horizon, rating) in [(Horizon::ShortTerm, short), (Horizon::LongTerm, long)] {
                if !self.qualifies(horizon, &rating) {
                    continue;
                }

                if let Err(e) = self.account.refresh_balances().await {
                    tracing::warn!("Balance refresh failed for {}: {}", pair.symbol(), e);
                    break;
                }

                let check = self.position_check(pair).await;
                let decision = self.evaluate_entry(horizon, &rating, &check);
                match decision.action {
                    ExecutionAction::Buy { notional, horizon } => {
                        tracing::info!(
                            "🎯 ({}) attempting to buy ${} ({:?}): {}",
                            pair.symbol(),
                            notional,
                            horizon,
                            decision.reason
                        );
                        if self.account.open_trade(pair, notional, horizon).await {
                            opened += 1;
                            if let Err(e) = self.account.refresh_balances().await {
                                tracing::warn!("Balance refresh after buy failed: {}", e);
                            }
                            break;
                        }
                    }
                    ExecutionAction::Skip => {
                        tracing::debug!("({}) {:?} entry skipped: {}", pair.symbol(), horizon, decision.reason);
                    }
                }
            }
        }

        opened
    }
}
