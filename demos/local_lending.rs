//! Walks one loan through request, fund and repay on the in-process ledger.
//!
//! Reads `LENDING_*` settings from the environment or a `.env` file; without
//! them it runs against a local network with a throwaway contract address.
//!
//! ```text
//! RUST_LOG=p2p_lending=debug cargo run --example local_lending
//! ```
use p2p_lending::{
    address::Address,
    clock::{Clock, ManualClock, TimeStamp},
    config::LedgerConfig,
    context::ConnectionContext,
    local::LocalLedger,
    loan::LoanStatus,
    money,
    orchestrator::{EffectSink, Navigation, Notification, OrchestratorConfig, TransactionOrchestrator},
    sync::ViewSynchronizer,
    telemetry, utils,
    validator::{self, LoanRequest},
};
use std::sync::Arc;
use tracing::{info, warn};

struct ConsoleSink;

impl EffectSink for ConsoleSink {
    fn notify(&self, notification: Notification) {
        match notification {
            Notification::Success { message, hash, .. } => println!("  ok: {message} ({})", utils::shorten(hash.as_str())),
            Notification::Failure { action, error } => println!("  {action} failed: {error}"),
        }
    }
    fn navigate(&self, navigation: Navigation) {
        match navigation {
            Navigation::AccountDashboard(address) => println!("  -> dashboard of {}", utils::short_address(&address)),
            Navigation::CloseDialogAndRefresh => println!("  -> close dialog and refresh"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    telemetry::init_tracing("p2p_lending=info,local_lending=info")?;

    let config = match LedgerConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "no usable ledger configuration, using the local network");
            LedgerConfig::local(Address::new([0xC0; 20]))
        }
    };
    info!(network = %config.network, contract = %config.contract_address, "starting");

    let temp_dir = tempfile::tempdir()?;
    let db = Arc::new(sled::open(temp_dir.path().join("local_lending.db"))?);
    // wall clock under manual control so the demo can skip ahead a month
    let manual = Arc::new(ManualClock::new(TimeStamp::now()));
    let clock: Arc<dyn Clock> = manual.clone();
    let ledger = Arc::new(LocalLedger::new(db, Arc::clone(&clock))?);
    let synchronizer = Arc::new(ViewSynchronizer::new(ledger.clone()));

    let borrower_address = Address::parse("0x1111111111111111111111111111111111111111")?;
    let lender_address = Address::parse("0x2222222222222222222222222222222222222222")?;
    let chain_id = config.network.chain_id();
    let orchestrator_for = |address: Address| -> anyhow::Result<TransactionOrchestrator> {
        let ctx = ConnectionContext::connect(&config, address, chain_id, ledger.clone(), Arc::clone(&clock))?;
        Ok(TransactionOrchestrator::new(
            ctx,
            Arc::clone(&synchronizer),
            OrchestratorConfig::from(&config),
        ))
    };
    let borrower = orchestrator_for(borrower_address)?;
    let lender = orchestrator_for(lender_address)?;
    let sink: Arc<dyn EffectSink> = Arc::new(ConsoleSink);

    println!("requesting 1.5 ETH");
    let draft = LoanRequest::new()
        .set_amount(money::parse_ether("1.5")?)
        .set_mortgage_cid("QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG")
        .set_due_date(clock.now().plus_secs(90 * 24 * 60 * 60));
    let action = validator::validate_request(borrower.context(), &draft)?;
    borrower.execute(action, Arc::clone(&sink)).await?;

    let open = synchronizer.loans(Some(LoanStatus::Requested));
    let Some(index) = open.first().map(|loan| loan.index) else {
        anyhow::bail!("the requested loan never appeared");
    };

    println!("funding loan {index}");
    let action = validator::validate_fund(lender.context(), &*synchronizer, index)?;
    lender.execute(action, Arc::clone(&sink)).await?;

    manual.advance(std::time::Duration::from_secs(30 * 24 * 60 * 60));
    println!("repaying loan {index} after 30 days");
    let action = validator::validate_repay(borrower.context(), &*synchronizer, index)?;
    borrower.execute(action, Arc::clone(&sink)).await?;

    for address in [borrower_address, lender_address] {
        let account = synchronizer.refresh_account(address).await;
        println!("{} is a {}", utils::short_address(&address), account.account_type);
        for loan in &account.loans {
            println!(
                "  loan {}: {} ETH, {}, interest {} ETH",
                loan.index,
                money::format_ether(loan.amount),
                loan.status,
                money::format_ether(loan.interest_accrued),
            );
        }
    }
    Ok(())
}
