use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    routing::get,
};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use kedai_accounting::{Account, JournalCommand, Ledger, LedgerId, OpenAccount, default_chart};
use kedai_infra::export;
use kedai_infra::read_model::PageRequest;

use crate::app::errors::{self, ApiResult};
use crate::app::routes::common::{created, csv_attachment, ok, require};
use crate::app::{dto, services::AppServices};
use crate::context::{PrincipalContext, TenantContext};

/// `/accounts`: the chart of accounts.
pub fn accounts_router() -> Router {
    Router::new().route("/", get(list_accounts).post(open_account))
}

/// `/ledger`: balances, journal and reports.
pub fn router() -> Router {
    Router::new()
        .route("/balances", get(balances))
        .route("/journal", get(journal).post(post_journal_entry))
        .route("/journal/:entry_id", get(journal_entry))
        .route("/trial-balance", get(trial_balance))
        .route("/export.csv", get(export_journal))
}

/// The tenant's chart with current balances. Before the first posting the
/// default chart is shown.
pub async fn list_accounts(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    require(&tenant, &principal, "ledger.read")?;
    let tenant_id = tenant.tenant_id();
    let ledger = services
        .ledger()
        .ledger(tenant_id)
        .await
        .map_err(errors::dispatch_error_to_response)?;
    let accounts: Vec<Account> = if ledger.is_initialized() {
        ledger.accounts().cloned().collect()
    } else {
        default_chart()
    };

    let items: Vec<_> = accounts
        .into_iter()
        .map(|account| {
            let balance = services.read_models.ledger.balance(tenant_id, &account.code);
            json!({
                "code": account.code,
                "name": account.name,
                "kind": account.kind,
                "debits": balance.as_ref().map(|b| b.debits).unwrap_or_default(),
                "credits": balance.as_ref().map(|b| b.credits).unwrap_or_default(),
                "balance": balance.map(|b| b.balance).unwrap_or_default(),
            })
        })
        .collect();
    Ok(ok(json!({ "items": items })))
}

pub async fn open_account(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::OpenAccountRequest>,
) -> ApiResult {
    require(&tenant, &principal, "ledger.write")?;
    let tenant_id = tenant.tenant_id();
    let now = Utc::now();
    let poster = services.ledger();
    poster
        .ensure_chart(tenant_id, now)
        .await
        .map_err(errors::dispatch_error_to_response)?;

    let ledger_id = LedgerId::for_tenant(tenant_id);
    let account = Account::new(&body.code, &body.name, body.kind);
    services
        .dispatcher
        .send::<Ledger>(
            tenant_id,
            ledger_id.0,
            JournalCommand::OpenAccount(OpenAccount {
                tenant_id,
                ledger_id,
                account,
                occurred_at: now,
            }),
        )
        .await
        .map_err(errors::dispatch_error_to_response)?;

    let ledger = poster
        .ledger(tenant_id)
        .await
        .map_err(errors::dispatch_error_to_response)?;
    let opened = ledger
        .account(body.code.trim())
        .cloned()
        .ok_or_else(|| errors::not_found("account not found"))?;
    Ok(created(opened))
}

pub async fn balances(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    require(&tenant, &principal, "ledger.read")?;
    let items = services.read_models.ledger.balances(tenant.tenant_id());
    Ok(ok(json!({ "items": items })))
}

pub async fn journal(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(page): Query<PageRequest>,
) -> ApiResult {
    require(&tenant, &principal, "ledger.read")?;
    Ok(ok(services.read_models.ledger.journal_page(tenant.tenant_id(), page)))
}

pub async fn journal_entry(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(entry_id): Path<Uuid>,
) -> ApiResult {
    require(&tenant, &principal, "ledger.read")?;
    services
        .read_models
        .ledger
        .entry(tenant.tenant_id(), entry_id)
        .map(ok)
        .ok_or_else(|| errors::not_found("journal entry not found"))
}

/// Manual journal entry. Lines must balance; the aggregate rejects
/// anything else.
pub async fn post_journal_entry(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::JournalEntryRequest>,
) -> ApiResult {
    require(&tenant, &principal, "ledger.write")?;
    if body.lines.is_empty() {
        return Err(errors::bad_request("journal entry needs lines"));
    }
    let entry_id = Uuid::now_v7();
    services
        .ledger()
        .post(
            tenant.tenant_id(),
            entry_id,
            body.lines.clone(),
            &body.description,
            body.source.as_deref(),
            Utc::now(),
        )
        .await
        .map_err(errors::dispatch_error_to_response)?;

    Ok(created(json!({
        "entry_id": entry_id,
        "description": body.description,
        "source": body.source,
        "lines": body.lines,
    })))
}

pub async fn trial_balance(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    require(&tenant, &principal, "ledger.read")?;
    Ok(ok(services.read_models.ledger.trial_balance(tenant.tenant_id())))
}

pub async fn export_journal(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    require(&tenant, &principal, "ledger.read")?;
    let tenant_id = tenant.tenant_id();
    let entries = services.read_models.ledger.journal(tenant_id);
    let balances = services.read_models.ledger.balances(tenant_id);
    Ok(csv_attachment("journal.csv", export::journal_csv(&entries, &balances)))
}
