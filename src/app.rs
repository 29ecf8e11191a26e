//! Task supervision.
//!
//! The supervisor owns every long-lived task: the bot loop (ingest +
//! route), the scheduled resync timer, the optional book printer, and the
//! asset-diff loop. Whenever any of them finishes, or anything trips the
//! ResetSignal, the whole group is torn down behind the trade lock and
//! restarted from a clean slate. Only fatal errors (refused credentials or
//! subscriptions) escape the loop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use futures_util::future::select_all;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::account::{self, AccountTracker};
use crate::config::Config;
use crate::error;
use crate::exchange::{protocol, ExchangeSession, Transport};
use crate::orderbook::MultiBook;
use crate::router::Router;
use crate::sync::{ResetSignal, TradeLock};
use crate::trader::{TraderConfig, TriangleTrader};
use crate::triangle::TriangleBss;

/// How many levels the periodic printer shows per side.
const PRINTED_LEVELS: usize = 5;

/// Delay for in-flight replies to land before a position snapshot is read.
const POSITION_SETTLE_SECS: u64 = 10;

pub struct App {
    config: Config,
    session: Arc<ExchangeSession>,
    book: Arc<RwLock<MultiBook>>,
    account: Arc<AccountTracker>,
    trader: Arc<TriangleTrader>,
    router: Arc<Router>,
    trade_lock: TradeLock,
    reset: Arc<ResetSignal>,
}

impl App {
    pub fn new(config: Config) -> Self {
        let session = Arc::new(ExchangeSession::new(
            config.ws_url.clone(),
            config.credentials.clone(),
            config.mfa_code.clone(),
        ));
        let transport: Arc<dyn Transport> = session.clone();

        let book = Arc::new(RwLock::new(MultiBook::new(
            &[config.legs.leg1, config.legs.leg2, config.legs.leg3],
            config.depth,
        )));
        let trade_lock = TradeLock::new();
        let reset = Arc::new(ResetSignal::new());

        let triangle = Arc::new(TriangleBss::new(
            book.clone(),
            config.legs,
            config.fee,
            config.quantity_decimals.clone(),
        ));
        let trader = Arc::new(TriangleTrader::new(
            transport.clone(),
            triangle,
            trade_lock.clone(),
            reset.clone(),
            TraderConfig {
                oms_id: config.oms_id,
                account_id: config.account_id,
                cash_available: config.cash_available,
                min_trade_value: config.min_trade_value,
                sequential_emission: config.sequential_emission,
                dry_run: config.dry_run,
                quantity_decimals: config.quantity_decimals.clone(),
            },
        ));
        let account = Arc::new(AccountTracker::new(
            transport,
            config.oms_id,
            config.account_id,
        ));
        let router = Arc::new(Router::new(
            book.clone(),
            account.clone(),
            trader.clone(),
            reset.clone(),
        ));

        Self {
            config,
            session,
            book,
            account,
            trader,
            router,
            trade_lock,
            reset,
        }
    }

    /// Run forever; each loop iteration is one life of the task group.
    /// Returns only on a fatal error.
    pub async fn run(&self) -> Result<()> {
        loop {
            let mut handles = self.spawn_tasks();
            handles.push(tokio::spawn(wait_for_reset(self.reset.clone())));

            let (result, _index, remaining) = select_all(handles).await;
            match result {
                Ok(Ok(())) => warn!("RESET: a task finished"),
                Ok(Err(e)) => {
                    if error::is_fatal(&e) {
                        for handle in &remaining {
                            handle.abort();
                        }
                        return Err(e);
                    }
                    error!(error = ?e, "RESET: task failed");
                }
                Err(join_error) => error!(error = %join_error, "RESET: task panicked"),
            }

            warn!("RESET: waiting for any in-flight trade cycle");
            let guard = self.trade_lock.acquire().await;

            warn!("RESET: restarting task group");
            for handle in &remaining {
                handle.abort();
            }
            self.session.close().await;
            self.book.write().clear();
            self.trader.reset();
            self.reset.clear();
            drop(guard);
        }
    }

    fn spawn_tasks(&self) -> Vec<JoinHandle<Result<()>>> {
        let mut handles = vec![
            tokio::spawn(bot_loop(
                self.session.clone(),
                self.router.clone(),
                self.account.clone(),
                self.config.clone(),
            )),
            tokio::spawn(auto_reset(
                self.reset.clone(),
                self.config.auto_reset_minutes,
            )),
            tokio::spawn(asset_diff_loop(
                self.account.clone(),
                self.trade_lock.clone(),
                self.config.asset_diff_minutes,
            )),
        ];
        if self.config.book_print_minutes > 0.0 {
            handles.push(tokio::spawn(book_printer(
                self.book.clone(),
                self.trade_lock.clone(),
                self.config.book_print_minutes,
            )));
        }
        handles
    }
}

async fn wait_for_reset(reset: Arc<ResetSignal>) -> Result<()> {
    reset.wait().await;
    warn!("RESET: signal received");
    Ok(())
}

/// Connect, authenticate, subscribe, then pump every inbound frame through
/// the router until the stream dies.
async fn bot_loop(
    session: Arc<ExchangeSession>,
    router: Arc<Router>,
    account: Arc<AccountTracker>,
    config: Config,
) -> Result<()> {
    session.connect().await?;
    session.authenticate().await?;
    account.request_refresh().await?;

    for instrument_id in [config.legs.leg1, config.legs.leg2, config.legs.leg3] {
        session
            .send(&protocol::subscribe_level2(
                config.oms_id,
                instrument_id,
                config.depth,
            ))
            .await?;
    }
    session
        .send(&protocol::subscribe_account_events(
            config.oms_id,
            config.account_id,
        ))
        .await?;

    info!("Running...");
    loop {
        match session.recv().await? {
            Some(message) => router.route(&message).await?,
            None => bail!("exchange stream ended"),
        }
    }
}

/// Scheduled resync. The feed has no sequence recovery; a periodic rebuild
/// bounds how long a silent desync can live.
async fn auto_reset(reset: Arc<ResetSignal>, minutes: u64) -> Result<()> {
    loop {
        sleep(Duration::from_secs(minutes * 60)).await;
        info!("Triggering scheduled resync");
        reset.set();
    }
}

async fn book_printer(
    book: Arc<RwLock<MultiBook>>,
    trade_lock: TradeLock,
    minutes: f64,
) -> Result<()> {
    loop {
        sleep(Duration::from_secs_f64(minutes * 60.0)).await;
        // Not while a trade is going through the books.
        let _guard = trade_lock.acquire().await;
        info!("current books:\n{}", book.read().render(PRINTED_LEVELS));
    }
}

/// Periodically re-snapshot account positions and log the net changes
/// since the previous snapshot.
async fn asset_diff_loop(
    account: Arc<AccountTracker>,
    trade_lock: TradeLock,
    minutes: u64,
) -> Result<()> {
    sleep(Duration::from_secs(POSITION_SETTLE_SECS)).await;
    let mut previous = account.snapshot();
    info!(positions = ?previous, "baseline positions");

    loop {
        sleep(Duration::from_secs(minutes * 60)).await;
        account.request_refresh().await?;
        sleep(Duration::from_secs(POSITION_SETTLE_SECS)).await;

        let current = {
            let _guard = trade_lock.acquire().await;
            account.snapshot()
        };
        account::log_position_changes(&previous, &current);
        previous = current;
    }
}
