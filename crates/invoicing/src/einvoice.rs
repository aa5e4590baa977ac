//! MyInvois e-invoice support: readiness validation over company, customer
//! and invoice data, the submission payload, and the `EInvoiceDocument`
//! aggregate tracking one submission through validation.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use kedai_company::CompanyProfile;
use kedai_core::validate::{GENERAL_PUBLIC_TIN, is_msic_code, is_postcode, validate_tin};
use kedai_core::{Address, Aggregate, AggregateRoot, DomainError, Money, TenantId};
use kedai_customers::Customer;
use kedai_events::Event;

use crate::invoice::{Invoice, InvoiceId, InvoiceStatus};

kedai_core::typed_id!(EInvoiceDocumentId, "EInvoiceDocumentId");

/// Validated documents may only be cancelled within this window.
pub const CANCELLATION_WINDOW_HOURS: i64 = 72;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueScope {
    Company,
    Customer,
    Invoice,
    Line(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessIssue {
    pub scope: IssueScope,
    pub field: String,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Readiness {
    pub ready: bool,
    pub issues: Vec<ReadinessIssue>,
}

impl Readiness {
    pub fn errors(&self) -> impl Iterator<Item = &ReadinessIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }
}

#[derive(Default)]
struct Collector(Vec<ReadinessIssue>);

impl Collector {
    fn push(&mut self, scope: IssueScope, field: &str, severity: Severity, message: impl Into<String>) {
        self.0.push(ReadinessIssue {
            scope,
            field: field.to_string(),
            severity,
            message: message.into(),
        });
    }

    fn error(&mut self, scope: IssueScope, field: &str, message: impl Into<String>) {
        self.push(scope, field, Severity::Error, message);
    }

    fn warn(&mut self, scope: IssueScope, field: &str, message: impl Into<String>) {
        self.push(scope, field, Severity::Warning, message);
    }

    fn require(&mut self, scope: IssueScope, field: &str, value: Option<&str>, label: &str) {
        if value.is_none_or(|v| v.trim().is_empty()) {
            self.error(scope, field, format!("{label} is required"));
        }
    }

    fn address(&mut self, scope: IssueScope, address: Option<&Address>, severity: Severity) {
        let Some(address) = address else {
            self.push(scope, "address", severity, "address is required");
            return;
        };
        for (field, value, label) in [
            ("address.line1", &address.line1, "address line"),
            ("address.city", &address.city, "city"),
            ("address.state", &address.state, "state"),
        ] {
            if value.trim().is_empty() {
                self.push(scope, field, severity, format!("{label} is required"));
            }
        }
        if !is_postcode(address.postcode.trim()) {
            self.push(scope, "address.postcode", severity, "postcode must be 5 digits");
        }
    }
}

/// Field-presence checks required before an invoice can be submitted to
/// MyInvois. Ready when no issue has error severity.
pub fn check_readiness(company: &CompanyProfile, customer: &Customer, invoice: &Invoice) -> Readiness {
    let mut c = Collector::default();

    // supplier
    match company.tin.as_deref() {
        None | Some("") => c.error(IssueScope::Company, "tin", "company TIN is required"),
        Some(tin) => {
            if validate_tin(tin).is_err() {
                c.error(IssueScope::Company, "tin", format!("company TIN {tin} is not valid"));
            }
        }
    }
    c.require(
        IssueScope::Company,
        "registration_number",
        company.registration_number.as_deref(),
        "business registration number",
    );
    match company.msic_code.as_deref() {
        Some(code) if is_msic_code(code) => {}
        Some(_) => c.error(IssueScope::Company, "msic_code", "MSIC code must be 5 digits"),
        None => c.error(IssueScope::Company, "msic_code", "MSIC code is required"),
    }
    c.require(
        IssueScope::Company,
        "business_activity",
        company.business_activity.as_deref(),
        "business activity description",
    );
    c.address(IssueScope::Company, Some(&company.address), Severity::Error);
    c.require(IssueScope::Company, "phone", company.phone.as_deref(), "company phone");
    c.require(IssueScope::Company, "email", company.email.as_deref(), "company email");

    // buyer
    if customer.name().trim().is_empty() {
        c.error(IssueScope::Customer, "name", "customer name is required");
    }
    let tax = customer.tax();
    match tax.tin.as_deref() {
        None | Some("") => c.warn(
            IssueScope::Customer,
            "tin",
            format!("customer has no TIN; general public TIN {GENERAL_PUBLIC_TIN} will be used"),
        ),
        Some(tin) => {
            if validate_tin(tin).is_err() {
                c.error(IssueScope::Customer, "tin", format!("customer TIN {tin} is not valid"));
            }
            if tax.id_type.is_none() {
                c.error(IssueScope::Customer, "id_type", "ID type is required when TIN is given");
            }
            c.require(IssueScope::Customer, "id_number", tax.id_number.as_deref(), "ID number");
        }
    }
    let contact = customer.contact();
    c.address(IssueScope::Customer, contact.address.as_ref(), Severity::Error);
    if contact.phone.is_none() && contact.email.is_none() {
        c.error(IssueScope::Customer, "contact", "customer phone or email is required");
    }

    // document
    match invoice.status() {
        InvoiceStatus::Draft => c.error(IssueScope::Invoice, "status", "draft invoices must be sent first"),
        InvoiceStatus::Cancelled => c.error(IssueScope::Invoice, "status", "invoice is cancelled"),
        _ => {}
    }
    if invoice.lines().is_empty() {
        c.error(IssueScope::Invoice, "lines", "invoice has no lines");
    }
    for line in invoice.lines() {
        let scope = IssueScope::Line(line.line_no);
        if line.description.trim().is_empty() {
            c.error(scope, "description", "description is required");
        }
        match line.classification_code.as_deref() {
            Some(code) if code.len() == 3 && code.bytes().all(|b| b.is_ascii_digit()) => {}
            Some(_) => c.error(scope, "classification_code", "classification code must be 3 digits"),
            None => c.error(scope, "classification_code", "classification code is required"),
        }
        if line.quantity <= 0 {
            c.error(scope, "quantity", "quantity must be positive");
        }
    }

    let ready = !c.0.iter().any(|i| i.severity == Severity::Error);
    Readiness { ready, issues: c.0 }
}

fn decimal(amount: Money) -> String {
    let sen = amount.sen();
    let sign = if sen < 0 { "-" } else { "" };
    let abs = sen.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

fn address_json(address: Option<&Address>) -> Value {
    match address {
        Some(a) => json!({
            "line1": a.line1,
            "line2": a.line2,
            "city": a.city,
            "postcode": a.postcode,
            "state": a.state,
            "country": a.country,
        }),
        None => Value::Null,
    }
}

/// Builds the e-invoice document (JSON) submitted to MyInvois.
pub fn build_payload(company: &CompanyProfile, customer: &Customer, invoice: &Invoice) -> Value {
    let tax = customer.tax();
    let contact = customer.contact();
    let totals = invoice.totals();

    let lines: Vec<Value> = invoice
        .lines()
        .iter()
        .map(|line| {
            let amounts = line.amounts().unwrap_or_default();
            json!({
                "id": line.line_no,
                "classification": line.classification_code,
                "description": line.description,
                "quantity": line.quantity,
                "unitPrice": decimal(line.unit_price),
                "discountRate": line.discount_rate.bps(),
                "discountAmount": decimal(amounts.discount),
                "taxRate": line.tax_rate.bps(),
                "taxAmount": decimal(amounts.tax),
                "subtotal": decimal(amounts.net),
                "total": decimal(amounts.total),
            })
        })
        .collect();

    json!({
        "invoiceTypeCode": "01",
        "id": invoice.number(),
        "issueDate": invoice.issue_date().map(|d| d.to_string()),
        "currency": "MYR",
        "supplier": {
            "name": company.name,
            "tin": company.tin,
            "registrationNumber": company.registration_number,
            "sstNumber": company.sst_number,
            "msicCode": company.msic_code,
            "businessActivity": company.business_activity,
            "address": address_json(Some(&company.address)),
            "phone": company.phone,
            "email": company.email,
        },
        "buyer": {
            "name": customer.name(),
            "tin": tax.tin.clone().unwrap_or_else(|| GENERAL_PUBLIC_TIN.to_string()),
            "idType": tax.id_type,
            "idNumber": tax.id_number,
            "sstNumber": tax.sst_number,
            "address": address_json(contact.address.as_ref()),
            "phone": contact.phone,
            "email": contact.email,
        },
        "lines": lines,
        "totals": {
            "subtotal": decimal(totals.subtotal),
            "discount": decimal(totals.discount_total),
            "tax": decimal(totals.tax_total),
            "payable": decimal(totals.total),
        },
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Prepared,
    Submitted,
    Valid,
    Invalid,
    Cancelled,
}

/// Aggregate root: one e-invoice submission of an invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EInvoiceDocument {
    id: EInvoiceDocumentId,
    tenant_id: Option<TenantId>,
    invoice_id: Option<InvoiceId>,
    invoice_number: String,
    payload: Value,
    status: DocumentStatus,
    submission_uid: Option<String>,
    uuid: Option<String>,
    long_id: Option<String>,
    errors: Vec<String>,
    validated_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl EInvoiceDocument {
    pub fn empty(id: EInvoiceDocumentId) -> Self {
        Self {
            id,
            tenant_id: None,
            invoice_id: None,
            invoice_number: String::new(),
            payload: Value::Null,
            status: DocumentStatus::Prepared,
            submission_uid: None,
            uuid: None,
            long_id: None,
            errors: Vec::new(),
            validated_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn invoice_id(&self) -> Option<InvoiceId> {
        self.invoice_id
    }

    pub fn status(&self) -> DocumentStatus {
        self.status
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn uuid(&self) -> Option<&str> {
        self.uuid.as_deref()
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn invoice_number(&self) -> &str {
        &self.invoice_number
    }

    pub fn submission_uid(&self) -> Option<&str> {
        self.submission_uid.as_deref()
    }

    pub fn long_id(&self) -> Option<&str> {
        self.long_id.as_deref()
    }

    pub fn validated_at(&self) -> Option<DateTime<Utc>> {
        self.validated_at
    }

    pub fn exists(&self) -> bool {
        self.created
    }
}

impl AggregateRoot for EInvoiceDocument {
    type Id = EInvoiceDocumentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareDocument {
    pub tenant_id: TenantId,
    pub document_id: EInvoiceDocumentId,
    pub invoice_id: InvoiceId,
    pub invoice_number: String,
    pub payload: Value,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkSubmitted {
    pub tenant_id: TenantId,
    pub document_id: EInvoiceDocumentId,
    pub submission_uid: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordValidation {
    pub tenant_id: TenantId,
    pub document_id: EInvoiceDocumentId,
    pub valid: bool,
    pub uuid: Option<String>,
    pub long_id: Option<String>,
    pub errors: Vec<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelDocument {
    pub tenant_id: TenantId,
    pub document_id: EInvoiceDocumentId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EInvoiceCommand {
    Prepare(PrepareDocument),
    MarkSubmitted(MarkSubmitted),
    RecordValidation(RecordValidation),
    Cancel(CancelDocument),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EInvoiceEvent {
    Prepared {
        tenant_id: TenantId,
        document_id: EInvoiceDocumentId,
        invoice_id: InvoiceId,
        invoice_number: String,
        payload: Value,
        occurred_at: DateTime<Utc>,
    },
    Submitted {
        tenant_id: TenantId,
        document_id: EInvoiceDocumentId,
        submission_uid: String,
        occurred_at: DateTime<Utc>,
    },
    Validated {
        tenant_id: TenantId,
        document_id: EInvoiceDocumentId,
        uuid: String,
        long_id: Option<String>,
        occurred_at: DateTime<Utc>,
    },
    Rejected {
        tenant_id: TenantId,
        document_id: EInvoiceDocumentId,
        errors: Vec<String>,
        occurred_at: DateTime<Utc>,
    },
    Cancelled {
        tenant_id: TenantId,
        document_id: EInvoiceDocumentId,
        reason: String,
        occurred_at: DateTime<Utc>,
    },
}

impl EInvoiceEvent {
    pub fn document_id(&self) -> EInvoiceDocumentId {
        match self {
            EInvoiceEvent::Prepared { document_id, .. }
            | EInvoiceEvent::Submitted { document_id, .. }
            | EInvoiceEvent::Validated { document_id, .. }
            | EInvoiceEvent::Rejected { document_id, .. }
            | EInvoiceEvent::Cancelled { document_id, .. } => *document_id,
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        match self {
            EInvoiceEvent::Prepared { tenant_id, .. }
            | EInvoiceEvent::Submitted { tenant_id, .. }
            | EInvoiceEvent::Validated { tenant_id, .. }
            | EInvoiceEvent::Rejected { tenant_id, .. }
            | EInvoiceEvent::Cancelled { tenant_id, .. } => *tenant_id,
        }
    }
}

impl Event for EInvoiceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            EInvoiceEvent::Prepared { .. } => "invoicing.einvoice.prepared",
            EInvoiceEvent::Submitted { .. } => "invoicing.einvoice.submitted",
            EInvoiceEvent::Validated { .. } => "invoicing.einvoice.validated",
            EInvoiceEvent::Rejected { .. } => "invoicing.einvoice.rejected",
            EInvoiceEvent::Cancelled { .. } => "invoicing.einvoice.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            EInvoiceEvent::Prepared { occurred_at, .. }
            | EInvoiceEvent::Submitted { occurred_at, .. }
            | EInvoiceEvent::Validated { occurred_at, .. }
            | EInvoiceEvent::Rejected { occurred_at, .. }
            | EInvoiceEvent::Cancelled { occurred_at, .. } => *occurred_at,
        }
    }
}

impl Aggregate for EInvoiceDocument {
    type Command = EInvoiceCommand;
    type Event = EInvoiceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            EInvoiceEvent::Prepared {
                tenant_id,
                document_id,
                invoice_id,
                invoice_number,
                payload,
                ..
            } => {
                self.id = *document_id;
                self.tenant_id = Some(*tenant_id);
                self.invoice_id = Some(*invoice_id);
                self.invoice_number = invoice_number.clone();
                self.payload = payload.clone();
                self.status = DocumentStatus::Prepared;
                self.created = true;
            }
            EInvoiceEvent::Submitted { submission_uid, .. } => {
                self.submission_uid = Some(submission_uid.clone());
                self.status = DocumentStatus::Submitted;
            }
            EInvoiceEvent::Validated {
                uuid,
                long_id,
                occurred_at,
                ..
            } => {
                self.uuid = Some(uuid.clone());
                self.long_id = long_id.clone();
                self.validated_at = Some(*occurred_at);
                self.errors.clear();
                self.status = DocumentStatus::Valid;
            }
            EInvoiceEvent::Rejected { errors, .. } => {
                self.errors = errors.clone();
                self.status = DocumentStatus::Invalid;
            }
            EInvoiceEvent::Cancelled { .. } => self.status = DocumentStatus::Cancelled,
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            EInvoiceCommand::Prepare(cmd) => {
                if self.created {
                    return Err(DomainError::conflict("document already prepared"));
                }
                if !cmd.payload.is_object() {
                    return Err(DomainError::validation("payload must be a JSON object"));
                }
                Ok(vec![EInvoiceEvent::Prepared {
                    tenant_id: cmd.tenant_id,
                    document_id: cmd.document_id,
                    invoice_id: cmd.invoice_id,
                    invoice_number: cmd.invoice_number.clone(),
                    payload: cmd.payload.clone(),
                    occurred_at: cmd.occurred_at,
                }])
            }
            EInvoiceCommand::MarkSubmitted(cmd) => {
                self.ensure_existing(cmd.tenant_id, cmd.document_id)?;
                self.ensure_status(DocumentStatus::Prepared, "submitted")?;
                let submission_uid = kedai_core::validate::required("submission_uid", &cmd.submission_uid)?;
                Ok(vec![EInvoiceEvent::Submitted {
                    tenant_id: cmd.tenant_id,
                    document_id: cmd.document_id,
                    submission_uid,
                    occurred_at: cmd.occurred_at,
                }])
            }
            EInvoiceCommand::RecordValidation(cmd) => {
                self.ensure_existing(cmd.tenant_id, cmd.document_id)?;
                self.ensure_status(DocumentStatus::Submitted, "validated")?;
                if cmd.valid {
                    let uuid = kedai_core::validate::required("uuid", cmd.uuid.as_deref().unwrap_or(""))?;
                    Ok(vec![EInvoiceEvent::Validated {
                        tenant_id: cmd.tenant_id,
                        document_id: cmd.document_id,
                        uuid,
                        long_id: cmd.long_id.clone(),
                        occurred_at: cmd.occurred_at,
                    }])
                } else {
                    Ok(vec![EInvoiceEvent::Rejected {
                        tenant_id: cmd.tenant_id,
                        document_id: cmd.document_id,
                        errors: cmd.errors.clone(),
                        occurred_at: cmd.occurred_at,
                    }])
                }
            }
            EInvoiceCommand::Cancel(cmd) => {
                self.ensure_existing(cmd.tenant_id, cmd.document_id)?;
                self.ensure_status(DocumentStatus::Valid, "cancelled")?;
                let reason = kedai_core::validate::required("reason", &cmd.reason)?;
                let validated_at = self.validated_at.unwrap_or(cmd.occurred_at);
                if cmd.occurred_at - validated_at > Duration::hours(CANCELLATION_WINDOW_HOURS) {
                    return Err(DomainError::invariant(format!(
                        "e-invoices can only be cancelled within {CANCELLATION_WINDOW_HOURS} hours of validation"
                    )));
                }
                Ok(vec![EInvoiceEvent::Cancelled {
                    tenant_id: cmd.tenant_id,
                    document_id: cmd.document_id,
                    reason,
                    occurred_at: cmd.occurred_at,
                }])
            }
        }
    }
}

impl EInvoiceDocument {
    fn ensure_existing(&self, tenant_id: TenantId, document_id: EInvoiceDocumentId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != document_id {
            return Err(DomainError::invariant("document_id mismatch"));
        }
        Ok(())
    }

    fn ensure_status(&self, expected: DocumentStatus, action: &str) -> Result<(), DomainError> {
        if self.status != expected {
            return Err(DomainError::invariant(format!(
                "document in status {:?} cannot be {action}",
                self.status
            )));
        }
        Ok(())
    }
}
