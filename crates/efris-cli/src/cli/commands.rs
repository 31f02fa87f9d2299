use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use efris_gateway::store::default_state_dir;
use efris_gateway::{
    Gateway, GatewayConfig, GatewayFailure, GatewayResult, JsonFileStore, JsonlIntegrationLog,
    OutcomeStatus, StockQuery,
};
use serde::Serialize;
use tracing::debug;

use super::args::{Cli, Command, GlobalArgs, QueryStockArgs, ResolveTaxpayerArgs};
use crate::exit_codes;

const INTEGRATION_LOG: &str = "integration.jsonl";

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    let gateway = match open_gateway(&cli.global).await {
        Ok(gateway) => gateway,
        Err(e) => return failed(&GatewayFailure::from(e)),
    };

    match cli.cmd {
        Command::TestConnection => {
            let outcome = gateway.test_connection().await;
            let code = match outcome.status {
                OutcomeStatus::Error => exit_codes::for_outcome(outcome.error_kind),
                OutcomeStatus::Success => exit_codes::SUCCESS,
            };
            emit(&outcome, code)
        }
        Command::RefreshKey => {
            let outcome = gateway.refresh_key().await;
            let code = exit_codes::for_outcome(outcome.error.as_ref().map(|e| e.kind));
            emit(&outcome, code)
        }
        Command::KeyStatus => emit(&gateway.key_status(), exit_codes::SUCCESS),
        Command::SyncUoms => {
            let outcome = gateway.sync_uoms().await;
            let code = exit_codes::for_outcome(outcome.error.as_ref().map(|e| e.kind));
            emit(&outcome, code)
        }
        Command::RemoveUom(args) => match gateway.remove_uom(&args.id).await {
            Ok(removed) => emit(
                &serde_json::json!({ "id": args.id.trim(), "removed": removed }),
                exit_codes::SUCCESS,
            ),
            Err(failure) => failed(&failure),
        },
        Command::ResolveTaxpayer(args) => resolve_taxpayer(&gateway, args).await,
        Command::QueryStock(args) => query_stock(&gateway, args).await,
    }
}

async fn resolve_taxpayer(gateway: &Gateway, args: ResolveTaxpayerArgs) -> anyhow::Result<i32> {
    let customer = args.customer.as_deref();
    let result = if args.store {
        gateway.resolve_and_store_taxpayer(&args.tin, customer).await
    } else {
        gateway.resolve_taxpayer(&args.tin, customer).await
    };

    match result {
        Ok(outcome) => emit(&outcome, exit_codes::SUCCESS),
        Err(failure) => failed(&failure),
    }
}

async fn query_stock(gateway: &Gateway, args: QueryStockArgs) -> anyhow::Result<i32> {
    let query = StockQuery {
        item_name: args.name,
        category: args.category,
        ..StockQuery::new(args.item_code)
    };

    match gateway.query_item(&query).await {
        // a rejected inquiry is still a completed command
        Ok(outcome) => emit(&outcome, exit_codes::SUCCESS),
        Err(failure) => failed(&failure),
    }
}

async fn open_gateway(global: &GlobalArgs) -> GatewayResult<Gateway> {
    let config = match &global.config {
        Some(path) => GatewayConfig::from_yaml_file(path)?,
        None => GatewayConfig::from_env(),
    };
    let state_dir = resolve_state_dir(global.state_dir.clone())?;
    debug!(state_dir = %state_dir.display(), "using state directory");

    let store = Arc::new(JsonFileStore::with_dir(&state_dir));
    Gateway::builder(config)
        .credential_store(store.clone())
        .catalog_store(store.clone())
        .taxpayer_store(store)
        .integration_log(Arc::new(JsonlIntegrationLog::new(
            state_dir.join(INTEGRATION_LOG),
        )))
        .build()
        .await
}

fn resolve_state_dir(explicit: Option<PathBuf>) -> GatewayResult<PathBuf> {
    match explicit {
        Some(dir) => Ok(dir),
        None => default_state_dir(),
    }
}

fn emit<T: Serialize>(value: &T, code: i32) -> anyhow::Result<i32> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize result")?;
    println!("{json}");
    Ok(code)
}

fn failed(failure: &GatewayFailure) -> anyhow::Result<i32> {
    emit(failure, failure.exit_code())
}
