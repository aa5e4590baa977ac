use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kedai_core::validate::{
    is_msic_code, is_postcode, normalize_my_phone, optional, required, validate_email,
    validate_tin,
};
use kedai_core::{Address, Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use kedai_events::Event;

/// Stream id of the single company profile of a tenant.
pub fn company_stream_id(tenant_id: TenantId) -> AggregateId {
    AggregateId::derived(tenant_id, "company.profile")
}

/// Legal and contact details printed on documents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub name: String,
    /// SSM business registration number.
    pub registration_number: Option<String>,
    pub tin: Option<String>,
    pub sst_number: Option<String>,
    pub msic_code: Option<String>,
    pub business_activity: Option<String>,
    pub address: Address,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl CompanyProfile {
    /// Validated, normalised copy.
    pub fn validated(&self) -> Result<Self, DomainError> {
        let name = required("company name", &self.name)?;
        let tin = match optional(self.tin.as_deref()) {
            Some(raw) => Some(validate_tin(&raw)?),
            None => None,
        };
        let msic_code = optional(self.msic_code.as_deref());
        if let Some(code) = &msic_code {
            if !is_msic_code(code) {
                return Err(DomainError::validation("MSIC code must be 5 digits"));
            }
        }
        let address = self.address.normalized();
        if !address.postcode.is_empty() && !is_postcode(&address.postcode) {
            return Err(DomainError::validation("postcode must be 5 digits"));
        }
        let phone = match optional(self.phone.as_deref()) {
            Some(raw) => Some(normalize_my_phone(&raw)?),
            None => None,
        };
        let email = match optional(self.email.as_deref()) {
            Some(raw) => Some(validate_email(&raw)?),
            None => None,
        };

        Ok(Self {
            name,
            registration_number: optional(self.registration_number.as_deref()),
            tin,
            sst_number: optional(self.sst_number.as_deref()),
            msic_code,
            business_activity: optional(self.business_activity.as_deref()),
            address,
            phone,
            email,
        })
    }
}

/// Partial profile update. `Some("")` clears an optional field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilePatch {
    pub name: Option<String>,
    pub registration_number: Option<String>,
    pub tin: Option<String>,
    pub sst_number: Option<String>,
    pub msic_code: Option<String>,
    pub business_activity: Option<String>,
    pub address: Option<Address>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub prefixes: Option<DocumentPrefixes>,
}

impl ProfilePatch {
    fn merge_into(&self, base: &CompanyProfile) -> CompanyProfile {
        fn pick(patch: &Option<String>, current: &Option<String>) -> Option<String> {
            match patch {
                Some(v) => Some(v.clone()),
                None => current.clone(),
            }
        }
        CompanyProfile {
            name: self.name.clone().unwrap_or_else(|| base.name.clone()),
            registration_number: pick(&self.registration_number, &base.registration_number),
            tin: pick(&self.tin, &base.tin),
            sst_number: pick(&self.sst_number, &base.sst_number),
            msic_code: pick(&self.msic_code, &base.msic_code),
            business_activity: pick(&self.business_activity, &base.business_activity),
            address: self.address.clone().unwrap_or_else(|| base.address.clone()),
            phone: pick(&self.phone, &base.phone),
            email: pick(&self.email, &base.email),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Invoice,
    Receipt,
    PosOrder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentPrefixes {
    pub invoice: String,
    pub receipt: String,
    pub order: String,
}

impl Default for DocumentPrefixes {
    fn default() -> Self {
        Self {
            invoice: "INV".into(),
            receipt: "RCT".into(),
            order: "ORD".into(),
        }
    }
}

impl DocumentPrefixes {
    fn validated(&self) -> Result<Self, DomainError> {
        fn check(field: &str, raw: &str) -> Result<String, DomainError> {
            let prefix = raw.trim().to_ascii_uppercase();
            if prefix.is_empty()
                || prefix.len() > 10
                || !prefix.bytes().all(|b| b.is_ascii_alphanumeric())
            {
                return Err(DomainError::validation(format!(
                    "{field} prefix must be 1-10 letters or digits"
                )));
            }
            Ok(prefix)
        }
        Ok(Self {
            invoice: check("invoice", &self.invoice)?,
            receipt: check("receipt", &self.receipt)?,
            order: check("order", &self.order)?,
        })
    }

    pub fn for_kind(&self, kind: DocumentKind) -> &str {
        match kind {
            DocumentKind::Invoice => &self.invoice,
            DocumentKind::Receipt => &self.receipt,
            DocumentKind::PosOrder => &self.order,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trialing,
    Active,
    PastDue,
    Canceled,
    Incomplete,
}

impl SubscriptionStatus {
    /// Maps a Stripe subscription status string.
    pub fn from_stripe(status: &str) -> Option<Self> {
        match status {
            "trialing" => Some(Self::Trialing),
            "active" => Some(Self::Active),
            "past_due" | "unpaid" => Some(Self::PastDue),
            "canceled" | "incomplete_expired" => Some(Self::Canceled),
            "incomplete" => Some(Self::Incomplete),
            _ => None,
        }
    }

    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Trialing | Self::Active | Self::PastDue)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub plan: String,
    pub status: SubscriptionStatus,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub current_period_end: Option<DateTime<Utc>>,
}

impl Default for Subscription {
    fn default() -> Self {
        Self {
            plan: "free".into(),
            status: SubscriptionStatus::Active,
            stripe_customer_id: None,
            stripe_subscription_id: None,
            current_period_end: None,
        }
    }
}

/// Aggregate root: Company.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Company {
    id: AggregateId,
    tenant_id: Option<TenantId>,
    profile: CompanyProfile,
    prefixes: DocumentPrefixes,
    next_invoice: u64,
    next_receipt: u64,
    next_order: u64,
    subscription: Subscription,
    version: u64,
    created: bool,
}

impl Company {
    pub fn empty(id: AggregateId) -> Self {
        Self {
            id,
            tenant_id: None,
            profile: CompanyProfile::default(),
            prefixes: DocumentPrefixes::default(),
            next_invoice: 1,
            next_receipt: 1,
            next_order: 1,
            subscription: Subscription::default(),
            version: 0,
            created: false,
        }
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn profile(&self) -> &CompanyProfile {
        &self.profile
    }

    pub fn prefixes(&self) -> &DocumentPrefixes {
        &self.prefixes
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    /// Sequence the next reservation of `kind` will receive.
    pub fn next_sequence(&self, kind: DocumentKind) -> u64 {
        match kind {
            DocumentKind::Invoice => self.next_invoice,
            DocumentKind::Receipt => self.next_receipt,
            DocumentKind::PosOrder => self.next_order,
        }
    }

    pub fn format_number(prefix: &str, sequence: u64) -> String {
        format!("{prefix}-{sequence:06}")
    }

    fn ensure_existing(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }
}

impl AggregateRoot for Company {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterCompany {
    pub tenant_id: TenantId,
    pub profile: CompanyProfile,
    pub prefixes: Option<DocumentPrefixes>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCompanyProfile {
    pub tenant_id: TenantId,
    pub patch: ProfilePatch,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveDocumentNumber {
    pub tenant_id: TenantId,
    pub kind: DocumentKind,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSubscription {
    pub tenant_id: TenantId,
    pub subscription: Subscription,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompanyCommand {
    Register(RegisterCompany),
    UpdateProfile(UpdateCompanyProfile),
    ReserveNumber(ReserveDocumentNumber),
    ChangeSubscription(ChangeSubscription),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompanyEvent {
    Registered {
        tenant_id: TenantId,
        profile: CompanyProfile,
        prefixes: DocumentPrefixes,
        occurred_at: DateTime<Utc>,
    },
    ProfileUpdated {
        tenant_id: TenantId,
        profile: CompanyProfile,
        prefixes: DocumentPrefixes,
        occurred_at: DateTime<Utc>,
    },
    DocumentNumberReserved {
        tenant_id: TenantId,
        kind: DocumentKind,
        sequence: u64,
        number: String,
        occurred_at: DateTime<Utc>,
    },
    SubscriptionChanged {
        tenant_id: TenantId,
        subscription: Subscription,
        occurred_at: DateTime<Utc>,
    },
}

impl CompanyEvent {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            CompanyEvent::Registered { tenant_id, .. }
            | CompanyEvent::ProfileUpdated { tenant_id, .. }
            | CompanyEvent::DocumentNumberReserved { tenant_id, .. }
            | CompanyEvent::SubscriptionChanged { tenant_id, .. } => *tenant_id,
        }
    }
}

impl Event for CompanyEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CompanyEvent::Registered { .. } => "company.profile.registered",
            CompanyEvent::ProfileUpdated { .. } => "company.profile.updated",
            CompanyEvent::DocumentNumberReserved { .. } => "company.numbering.reserved",
            CompanyEvent::SubscriptionChanged { .. } => "company.subscription.changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CompanyEvent::Registered { occurred_at, .. }
            | CompanyEvent::ProfileUpdated { occurred_at, .. }
            | CompanyEvent::DocumentNumberReserved { occurred_at, .. }
            | CompanyEvent::SubscriptionChanged { occurred_at, .. } => *occurred_at,
        }
    }
}

impl Aggregate for Company {
    type Command = CompanyCommand;
    type Event = CompanyEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CompanyEvent::Registered {
                tenant_id,
                profile,
                prefixes,
                ..
            } => {
                self.tenant_id = Some(*tenant_id);
                self.profile = profile.clone();
                self.prefixes = prefixes.clone();
                self.created = true;
            }
            CompanyEvent::ProfileUpdated {
                profile, prefixes, ..
            } => {
                self.profile = profile.clone();
                self.prefixes = prefixes.clone();
            }
            CompanyEvent::DocumentNumberReserved { kind, sequence, .. } => {
                let next = sequence + 1;
                match kind {
                    DocumentKind::Invoice => self.next_invoice = next,
                    DocumentKind::Receipt => self.next_receipt = next,
                    DocumentKind::PosOrder => self.next_order = next,
                }
            }
            CompanyEvent::SubscriptionChanged { subscription, .. } => {
                self.subscription = subscription.clone();
            }
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CompanyCommand::Register(cmd) => {
                if self.created {
                    return Err(DomainError::conflict("company already registered"));
                }
                let prefixes = cmd.prefixes.clone().unwrap_or_default().validated()?;
                Ok(vec![CompanyEvent::Registered {
                    tenant_id: cmd.tenant_id,
                    profile: cmd.profile.validated()?,
                    prefixes,
                    occurred_at: cmd.occurred_at,
                }])
            }
            CompanyCommand::UpdateProfile(cmd) => {
                self.ensure_existing(cmd.tenant_id)?;
                let profile = cmd.patch.merge_into(&self.profile).validated()?;
                let prefixes = match &cmd.patch.prefixes {
                    Some(p) => p.validated()?,
                    None => self.prefixes.clone(),
                };
                if profile == self.profile && prefixes == self.prefixes {
                    return Ok(vec![]);
                }
                Ok(vec![CompanyEvent::ProfileUpdated {
                    tenant_id: cmd.tenant_id,
                    profile,
                    prefixes,
                    occurred_at: cmd.occurred_at,
                }])
            }
            CompanyCommand::ReserveNumber(cmd) => {
                self.ensure_existing(cmd.tenant_id)?;
                let sequence = self.next_sequence(cmd.kind);
                Ok(vec![CompanyEvent::DocumentNumberReserved {
                    tenant_id: cmd.tenant_id,
                    kind: cmd.kind,
                    sequence,
                    number: Self::format_number(self.prefixes.for_kind(cmd.kind), sequence),
                    occurred_at: cmd.occurred_at,
                }])
            }
            CompanyCommand::ChangeSubscription(cmd) => {
                self.ensure_existing(cmd.tenant_id)?;
                if cmd.subscription.plan.trim().is_empty() {
                    return Err(DomainError::validation("plan is required"));
                }
                if cmd.subscription == self.subscription {
                    return Ok(vec![]);
                }
                Ok(vec![CompanyEvent::SubscriptionChanged {
                    tenant_id: cmd.tenant_id,
                    subscription: cmd.subscription.clone(),
                    occurred_at: cmd.occurred_at,
                }])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kedai_events::execute;

    fn profile() -> CompanyProfile {
        CompanyProfile {
            name: " Kedai Runcit Ah Chong ".into(),
            registration_number: Some("202301012345".into()),
            tin: Some("c20880050010".into()),
            sst_number: None,
            msic_code: Some("47111".into()),
            business_activity: Some("Retail sale in provision stores".into()),
            address: Address {
                line1: "12 Jalan Ampang".into(),
                line2: None,
                city: "Kuala Lumpur".into(),
                postcode: "50450".into(),
                state: "W.P. Kuala Lumpur".into(),
                country: "MYS".into(),
            },
            phone: Some("03-2141 2345".into()),
            email: Some("Owner@AhChong.my".into()),
        }
    }

    fn registered(tenant_id: TenantId) -> Company {
        let mut company = Company::empty(company_stream_id(tenant_id));
        execute(
            &mut company,
            &CompanyCommand::Register(RegisterCompany {
                tenant_id,
                profile: profile(),
                prefixes: None,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        company
    }

    fn reserve(company: &mut Company, tenant_id: TenantId, kind: DocumentKind) -> String {
        let events = execute(
            company,
            &CompanyCommand::ReserveNumber(ReserveDocumentNumber {
                tenant_id,
                kind,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        match &events[0] {
            CompanyEvent::DocumentNumberReserved { number, .. } => number.clone(),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn register_normalizes_profile() {
        let company = registered(TenantId::new());
        let p = company.profile();
        assert_eq!(p.name, "Kedai Runcit Ah Chong");
        assert_eq!(p.tin.as_deref(), Some("C20880050010"));
        assert_eq!(p.phone.as_deref(), Some("+60321412345"));
        assert_eq!(p.email.as_deref(), Some("owner@ahchong.my"));
        assert_eq!(company.prefixes().invoice, "INV");
    }

    #[test]
    fn numbers_are_sequential_per_kind() {
        let tenant_id = TenantId::new();
        let mut company = registered(tenant_id);

        assert_eq!(reserve(&mut company, tenant_id, DocumentKind::Invoice), "INV-000001");
        assert_eq!(reserve(&mut company, tenant_id, DocumentKind::Invoice), "INV-000002");
        assert_eq!(reserve(&mut company, tenant_id, DocumentKind::Receipt), "RCT-000001");
        assert_eq!(reserve(&mut company, tenant_id, DocumentKind::PosOrder), "ORD-000001");
        assert_eq!(company.next_sequence(DocumentKind::Invoice), 3);
    }

    #[test]
    fn prefix_change_applies_to_next_number() {
        let tenant_id = TenantId::new();
        let mut company = registered(tenant_id);
        reserve(&mut company, tenant_id, DocumentKind::Invoice);

        execute(
            &mut company,
            &CompanyCommand::UpdateProfile(UpdateCompanyProfile {
                tenant_id,
                patch: ProfilePatch {
                    prefixes: Some(DocumentPrefixes {
                        invoice: "ac".into(),
                        ..DocumentPrefixes::default()
                    }),
                    ..ProfilePatch::default()
                },
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();

        assert_eq!(reserve(&mut company, tenant_id, DocumentKind::Invoice), "AC-000002");
    }

    #[test]
    fn rejects_bad_msic_and_prefix() {
        let tenant_id = TenantId::new();
        let company = registered(tenant_id);

        let err = company
            .handle(&CompanyCommand::UpdateProfile(UpdateCompanyProfile {
                tenant_id,
                patch: ProfilePatch {
                    msic_code: Some("471".into()),
                    ..ProfilePatch::default()
                },
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let err = company
            .handle(&CompanyCommand::UpdateProfile(UpdateCompanyProfile {
                tenant_id,
                patch: ProfilePatch {
                    prefixes: Some(DocumentPrefixes {
                        invoice: "INV-".into(),
                        ..DocumentPrefixes::default()
                    }),
                    ..ProfilePatch::default()
                },
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn empty_patch_clears_optional_field() {
        let tenant_id = TenantId::new();
        let mut company = registered(tenant_id);
        execute(
            &mut company,
            &CompanyCommand::UpdateProfile(UpdateCompanyProfile {
                tenant_id,
                patch: ProfilePatch {
                    sst_number: Some("W10-1808-31000123".into()),
                    email: Some(String::new()),
                    ..ProfilePatch::default()
                },
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();

        assert_eq!(company.profile().sst_number.as_deref(), Some("W10-1808-31000123"));
        assert_eq!(company.profile().email, None);
    }

    #[test]
    fn identical_subscription_is_not_re_recorded() {
        let tenant_id = TenantId::new();
        let company = registered(tenant_id);
        let events = company
            .handle(&CompanyCommand::ChangeSubscription(ChangeSubscription {
                tenant_id,
                subscription: Subscription::default(),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn stripe_statuses_map() {
        assert_eq!(SubscriptionStatus::from_stripe("past_due"), Some(SubscriptionStatus::PastDue));
        assert_eq!(SubscriptionStatus::from_stripe("incomplete_expired"), Some(SubscriptionStatus::Canceled));
        assert_eq!(SubscriptionStatus::from_stripe("paused"), None);
        assert!(!SubscriptionStatus::Canceled.is_usable());
    }

    #[test]
    fn reserving_before_registration_is_not_found() {
        let tenant_id = TenantId::new();
        let company = Company::empty(company_stream_id(tenant_id));
        let err = company
            .handle(&CompanyCommand::ReserveNumber(ReserveDocumentNumber {
                tenant_id,
                kind: DocumentKind::Invoice,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }
}
