//! Wallet views and withdrawals.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::auth::Auth;
use crate::error::{ok, ApiError, Envelope, Page};
use crate::models::{Wallet, WalletChange, Withdraw, WithdrawAccount};
use crate::state::AppState;
use crate::storage::StoreError;

#[utoipa::path(
    get,
    path = "/wallet",
    tag = "Wallet",
    responses((status = 200, description = "Caller's wallet", body = Wallet))
)]
pub async fn get_wallet(
    State(state): State<AppState>,
    Auth(ctx): Auth,
) -> Result<Json<Envelope<Wallet>>, ApiError> {
    Ok(ok(state.store.wallet(ctx.user_id())?))
}

#[derive(Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

impl PageQuery {
    fn window(&self) -> (usize, usize) {
        let page = self.page.unwrap_or(1).max(1);
        let size = self.page_size.unwrap_or(20).clamp(1, 100);
        ((page - 1) * size, size)
    }
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChangesPage {
    pub items: Vec<WalletChange>,
    #[serde(flatten)]
    pub page: Page,
}

#[utoipa::path(
    get,
    path = "/wallet/changes",
    params(PageQuery),
    tag = "Wallet",
    responses((status = 200, description = "Balance change history", body = ChangesPage))
)]
pub async fn list_changes(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Query(query): Query<PageQuery>,
) -> Result<Json<Envelope<ChangesPage>>, ApiError> {
    let (offset, limit) = query.window();
    let (items, total) = state.store.wallet_changes(ctx.user_id(), offset, limit)?;
    Ok(ok(ChangesPage {
        items,
        page: Page {
            page: (offset / limit + 1) as u64,
            page_size: limit as u64,
            total: total as u64,
            offset: offset as u64,
        },
    }))
}

#[utoipa::path(
    get,
    path = "/withdraw/accounts",
    tag = "Wallet",
    responses((status = 200, description = "Payout accounts", body = [WithdrawAccount]))
)]
pub async fn list_accounts(
    State(state): State<AppState>,
    Auth(ctx): Auth,
) -> Result<Json<Envelope<Vec<WithdrawAccount>>>, ApiError> {
    Ok(ok(state.store.withdraw_accounts(ctx.user_id())?))
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountRequest {
    pub account_type: String,
    pub account_no: String,
    pub holder_name: String,
}

#[utoipa::path(
    post,
    path = "/withdraw/accounts",
    request_body = CreateAccountRequest,
    tag = "Wallet",
    responses((status = 200, description = "Created account", body = WithdrawAccount))
)]
pub async fn create_account(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Json(request): Json<CreateAccountRequest>,
) -> Result<Json<Envelope<WithdrawAccount>>, ApiError> {
    if request.account_no.is_empty() || request.holder_name.is_empty() {
        return Err(ApiError::invalid_argument(
            "account_no and holder_name are required",
        ));
    }
    let account = state.store.create_withdraw_account(
        ctx.user_id(),
        &request.account_type,
        &request.account_no,
        &request.holder_name,
    )?;
    Ok(ok(account))
}

#[utoipa::path(
    get,
    path = "/withdraws",
    tag = "Wallet",
    responses((status = 200, description = "Withdrawal history", body = [Withdraw]))
)]
pub async fn list_withdraws(
    State(state): State<AppState>,
    Auth(ctx): Auth,
) -> Result<Json<Envelope<Vec<Withdraw>>>, ApiError> {
    Ok(ok(state.store.withdraws(ctx.user_id())?))
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateWithdrawRequest {
    pub account_id: u64,
    /// Amount in cents.
    pub amount: i64,
}

#[utoipa::path(
    post,
    path = "/withdraws",
    request_body = CreateWithdrawRequest,
    tag = "Wallet",
    responses(
        (status = 200, description = "Created withdrawal", body = Withdraw),
        (status = 400, description = "Bad amount, foreign account, or insufficient balance")
    )
)]
pub async fn create_withdraw(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Json(request): Json<CreateWithdrawRequest>,
) -> Result<Json<Envelope<Withdraw>>, ApiError> {
    let withdraw = state
        .store
        .create_withdraw(ctx.user_id(), request.account_id, request.amount)
        .map_err(|err| match err {
            StoreError::Conflict(msg) => ApiError::invalid_operation(msg),
            other => other.into(),
        })?;
    Ok(ok(withdraw))
}
