use std::str::FromStr;

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use kedai_auth::Permission;
use kedai_core::{DomainError, TenantId};
use kedai_invoicing::LineItem;
use kedai_products::{Product, ProductId};

use crate::app::dto::LineRequest;
use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::{PrincipalContext, TenantContext};

/// Permission check for one request; the error is the 403 response.
pub fn require(tenant: &TenantContext, principal: &PrincipalContext, permission: &'static str) -> Result<(), Response> {
    crate::authz::authorize_request(tenant, principal, &[Permission::from_static(permission)])
        .map_err(errors::forbidden)
}

/// Parses a path or body id, answering 400 on garbage.
pub fn parse_id<T>(raw: &str) -> Result<T, Response>
where
    T: FromStr<Err = DomainError>,
{
    raw.parse::<T>().map_err(|e| errors::bad_request(e.to_string()))
}

pub fn ok<T: Serialize>(body: T) -> Response {
    (StatusCode::OK, Json(body)).into_response()
}

pub fn created<T: Serialize>(body: T) -> Response {
    (StatusCode::CREATED, Json(body)).into_response()
}

pub fn csv_attachment(filename: &str, body: String) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, kedai_infra::export::CONTENT_TYPE.to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{filename}\"")),
        ],
        body,
    )
        .into_response()
}

/// Turns client lines into document lines, numbering them from 1 and
/// filling blanks of catalog lines from the product.
pub async fn resolve_lines(
    services: &AppServices,
    tenant_id: TenantId,
    lines: Vec<LineRequest>,
) -> Result<Vec<LineItem>, Response> {
    let mut resolved = Vec::with_capacity(lines.len());
    for (index, line) in lines.into_iter().enumerate() {
        let line_no = u32::try_from(index + 1).map_err(|_| errors::bad_request("too many lines"))?;
        let product_id = match line.product_id.as_deref() {
            Some(raw) => Some(parse_id::<ProductId>(raw)?),
            None => None,
        };

        let mut item = LineItem {
            line_no,
            product_id,
            description: line.description.unwrap_or_default(),
            quantity: line.quantity,
            unit_price: line.unit_price.unwrap_or_default(),
            discount_rate: line.discount_rate,
            tax_rate: line.tax_rate.unwrap_or_default(),
            classification_code: line.classification_code,
        };

        if let Some(product_id) = product_id {
            let product: Product = services
                .dispatcher
                .load(tenant_id, product_id.0)
                .await
                .map_err(errors::dispatch_error_to_response)?;
            let Some(details) = product.details() else {
                return Err(errors::bad_request(format!("unknown product {product_id}")));
            };
            if item.description.trim().is_empty() {
                item.description = details.name.clone();
            }
            if line.unit_price.is_none() {
                item.unit_price = details.unit_price;
            }
            if line.tax_rate.is_none() {
                item.tax_rate = details.tax_rate;
            }
            if item.classification_code.is_none() {
                item.classification_code = details.classification_code.clone();
            }
        } else if line.unit_price.is_none() {
            return Err(errors::bad_request(format!("line {line_no}: unit_price is required")));
        }

        resolved.push(item);
    }
    Ok(resolved)
}
