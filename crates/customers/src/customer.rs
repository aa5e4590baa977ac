use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kedai_core::validate::{normalize_my_phone, optional, required, validate_email, validate_tin};
use kedai_core::{Address, Aggregate, AggregateRoot, DomainError, TenantId};
use kedai_events::Event;

kedai_core::typed_id!(CustomerId, "CustomerId");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomerStatus {
    Active,
    Archived,
}

/// Registration scheme of the buyer's identification number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IdType {
    /// SSM business registration.
    Brn,
    Nric,
    Passport,
    Army,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub email: Option<String>,
    /// E.164 after normalisation.
    pub phone: Option<String>,
    pub address: Option<Address>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxIdentity {
    pub tin: Option<String>,
    pub id_type: Option<IdType>,
    pub id_number: Option<String>,
    pub sst_number: Option<String>,
}

fn validate_contact(contact: &ContactInfo) -> Result<ContactInfo, DomainError> {
    let email = match optional(contact.email.as_deref()) {
        Some(raw) => Some(validate_email(&raw)?),
        None => None,
    };
    let phone = match optional(contact.phone.as_deref()) {
        Some(raw) => Some(normalize_my_phone(&raw)?),
        None => None,
    };
    Ok(ContactInfo {
        email,
        phone,
        address: contact.address.as_ref().map(Address::normalized),
    })
}

fn validate_tax(tax: &TaxIdentity) -> Result<TaxIdentity, DomainError> {
    let tin = match optional(tax.tin.as_deref()) {
        Some(raw) => Some(validate_tin(&raw)?),
        None => None,
    };
    let id_number = optional(tax.id_number.as_deref());
    if tax.id_type.is_some() && id_number.is_none() {
        return Err(DomainError::validation("id_number is required when id_type is set"));
    }
    if tax.id_type.is_none() && id_number.is_some() {
        return Err(DomainError::validation("id_type is required when id_number is set"));
    }
    Ok(TaxIdentity {
        tin,
        id_type: tax.id_type,
        id_number,
        sst_number: optional(tax.sst_number.as_deref()),
    })
}

/// Aggregate root: Customer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Customer {
    id: CustomerId,
    tenant_id: Option<TenantId>,
    name: String,
    contact: ContactInfo,
    tax: TaxIdentity,
    notes: Option<String>,
    status: CustomerStatus,
    version: u64,
    created: bool,
}

impl Customer {
    pub fn empty(id: CustomerId) -> Self {
        Self {
            id,
            tenant_id: None,
            name: String::new(),
            contact: ContactInfo::default(),
            tax: TaxIdentity::default(),
            notes: None,
            status: CustomerStatus::Active,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> CustomerId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contact(&self) -> &ContactInfo {
        &self.contact
    }

    pub fn tax(&self) -> &TaxIdentity {
        &self.tax
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn status(&self) -> CustomerStatus {
        self.status
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    /// Archived customers cannot be billed.
    pub fn can_transact(&self) -> bool {
        self.created && self.status == CustomerStatus::Active
    }
}

impl AggregateRoot for Customer {
    type Id = CustomerId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterCustomer {
    pub tenant_id: TenantId,
    pub customer_id: CustomerId,
    pub name: String,
    pub contact: ContactInfo,
    pub tax: TaxIdentity,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Fields left `None` keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerPatch {
    pub name: Option<String>,
    pub contact: Option<ContactInfo>,
    pub tax: Option<TaxIdentity>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCustomer {
    pub tenant_id: TenantId,
    pub customer_id: CustomerId,
    pub patch: CustomerPatch,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveCustomer {
    pub tenant_id: TenantId,
    pub customer_id: CustomerId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreCustomer {
    pub tenant_id: TenantId,
    pub customer_id: CustomerId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CustomerCommand {
    Register(RegisterCustomer),
    Update(UpdateCustomer),
    Archive(ArchiveCustomer),
    Restore(RestoreCustomer),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerDetails {
    pub name: String,
    pub contact: ContactInfo,
    pub tax: TaxIdentity,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CustomerEvent {
    Registered {
        tenant_id: TenantId,
        customer_id: CustomerId,
        details: CustomerDetails,
        occurred_at: DateTime<Utc>,
    },
    Updated {
        tenant_id: TenantId,
        customer_id: CustomerId,
        details: CustomerDetails,
        occurred_at: DateTime<Utc>,
    },
    Archived {
        tenant_id: TenantId,
        customer_id: CustomerId,
        occurred_at: DateTime<Utc>,
    },
    Restored {
        tenant_id: TenantId,
        customer_id: CustomerId,
        occurred_at: DateTime<Utc>,
    },
}

impl CustomerEvent {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            CustomerEvent::Registered { tenant_id, .. }
            | CustomerEvent::Updated { tenant_id, .. }
            | CustomerEvent::Archived { tenant_id, .. }
            | CustomerEvent::Restored { tenant_id, .. } => *tenant_id,
        }
    }

    pub fn customer_id(&self) -> CustomerId {
        match self {
            CustomerEvent::Registered { customer_id, .. }
            | CustomerEvent::Updated { customer_id, .. }
            | CustomerEvent::Archived { customer_id, .. }
            | CustomerEvent::Restored { customer_id, .. } => *customer_id,
        }
    }
}

impl Event for CustomerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CustomerEvent::Registered { .. } => "customers.customer.registered",
            CustomerEvent::Updated { .. } => "customers.customer.updated",
            CustomerEvent::Archived { .. } => "customers.customer.archived",
            CustomerEvent::Restored { .. } => "customers.customer.restored",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CustomerEvent::Registered { occurred_at, .. }
            | CustomerEvent::Updated { occurred_at, .. }
            | CustomerEvent::Archived { occurred_at, .. }
            | CustomerEvent::Restored { occurred_at, .. } => *occurred_at,
        }
    }
}

impl Aggregate for Customer {
    type Command = CustomerCommand;
    type Event = CustomerEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CustomerEvent::Registered {
                tenant_id,
                customer_id,
                details,
                ..
            } => {
                self.id = *customer_id;
                self.tenant_id = Some(*tenant_id);
                self.set_details(details);
                self.status = CustomerStatus::Active;
                self.created = true;
            }
            CustomerEvent::Updated { details, .. } => self.set_details(details),
            CustomerEvent::Archived { .. } => self.status = CustomerStatus::Archived,
            CustomerEvent::Restored { .. } => self.status = CustomerStatus::Active,
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CustomerCommand::Register(cmd) => self.handle_register(cmd),
            CustomerCommand::Update(cmd) => self.handle_update(cmd),
            CustomerCommand::Archive(cmd) => {
                self.ensure_existing(cmd.tenant_id, cmd.customer_id)?;
                if self.status == CustomerStatus::Archived {
                    return Err(DomainError::conflict("customer is already archived"));
                }
                Ok(vec![CustomerEvent::Archived {
                    tenant_id: cmd.tenant_id,
                    customer_id: cmd.customer_id,
                    occurred_at: cmd.occurred_at,
                }])
            }
            CustomerCommand::Restore(cmd) => {
                self.ensure_existing(cmd.tenant_id, cmd.customer_id)?;
                if self.status == CustomerStatus::Active {
                    return Err(DomainError::conflict("customer is not archived"));
                }
                Ok(vec![CustomerEvent::Restored {
                    tenant_id: cmd.tenant_id,
                    customer_id: cmd.customer_id,
                    occurred_at: cmd.occurred_at,
                }])
            }
        }
    }
}

impl Customer {
    fn set_details(&mut self, details: &CustomerDetails) {
        self.name = details.name.clone();
        self.contact = details.contact.clone();
        self.tax = details.tax.clone();
        self.notes = details.notes.clone();
    }

    fn ensure_existing(&self, tenant_id: TenantId, customer_id: CustomerId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != customer_id {
            return Err(DomainError::invariant("customer_id mismatch"));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterCustomer) -> Result<Vec<CustomerEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("customer already exists"));
        }

        Ok(vec![CustomerEvent::Registered {
            tenant_id: cmd.tenant_id,
            customer_id: cmd.customer_id,
            details: CustomerDetails {
                name: required("name", &cmd.name)?,
                contact: validate_contact(&cmd.contact)?,
                tax: validate_tax(&cmd.tax)?,
                notes: optional(cmd.notes.as_deref()),
            },
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_update(&self, cmd: &UpdateCustomer) -> Result<Vec<CustomerEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.customer_id)?;
        if self.status == CustomerStatus::Archived {
            return Err(DomainError::invariant("archived customers cannot be updated"));
        }

        let patch = &cmd.patch;
        let details = CustomerDetails {
            name: required("name", patch.name.as_deref().unwrap_or(&self.name))?,
            contact: validate_contact(patch.contact.as_ref().unwrap_or(&self.contact))?,
            tax: validate_tax(patch.tax.as_ref().unwrap_or(&self.tax))?,
            notes: match &patch.notes {
                Some(n) => optional(Some(n)),
                None => self.notes.clone(),
            },
        };

        let unchanged = details.name == self.name
            && details.contact == self.contact
            && details.tax == self.tax
            && details.notes == self.notes;
        if unchanged {
            return Ok(vec![]);
        }

        Ok(vec![CustomerEvent::Updated {
            tenant_id: cmd.tenant_id,
            customer_id: cmd.customer_id,
            details,
            occurred_at: cmd.occurred_at,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kedai_core::AggregateId;
    use kedai_events::execute;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn register(tenant_id: TenantId) -> Customer {
        let customer_id = CustomerId::new(AggregateId::new());
        let mut customer = Customer::empty(customer_id);
        execute(
            &mut customer,
            &CustomerCommand::Register(RegisterCustomer {
                tenant_id,
                customer_id,
                name: "Syarikat Maju Jaya Sdn Bhd".into(),
                contact: ContactInfo {
                    email: Some("Akaun@MajuJaya.com.my".into()),
                    phone: Some("019-876 5432".into()),
                    address: None,
                },
                tax: TaxIdentity {
                    tin: Some("C10987654320".into()),
                    id_type: Some(IdType::Brn),
                    id_number: Some("201901000005".into()),
                    sst_number: None,
                },
                notes: None,
                occurred_at: now(),
            }),
        )
        .unwrap();
        customer
    }

    #[test]
    fn register_normalizes_contact() {
        let customer = register(TenantId::new());
        assert_eq!(customer.contact().email.as_deref(), Some("akaun@majujaya.com.my"));
        assert_eq!(customer.contact().phone.as_deref(), Some("+60198765432"));
        assert!(customer.can_transact());
    }

    #[test]
    fn register_rejects_invalid_phone() {
        let customer_id = CustomerId::new(AggregateId::new());
        let err = Customer::empty(customer_id)
            .handle(&CustomerCommand::Register(RegisterCustomer {
                tenant_id: TenantId::new(),
                customer_id,
                name: "Ali".into(),
                contact: ContactInfo {
                    phone: Some("12345".into()),
                    ..ContactInfo::default()
                },
                tax: TaxIdentity::default(),
                notes: None,
                occurred_at: now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn id_number_requires_id_type() {
        let customer_id = CustomerId::new(AggregateId::new());
        let err = Customer::empty(customer_id)
            .handle(&CustomerCommand::Register(RegisterCustomer {
                tenant_id: TenantId::new(),
                customer_id,
                name: "Ali".into(),
                contact: ContactInfo::default(),
                tax: TaxIdentity {
                    id_number: Some("900101-14-5555".into()),
                    ..TaxIdentity::default()
                },
                notes: None,
                occurred_at: now(),
            }))
            .unwrap_err();
        assert!(err.to_string().contains("id_type"));
    }

    #[test]
    fn archived_customer_cannot_be_updated_until_restored() {
        let tenant_id = TenantId::new();
        let mut customer = register(tenant_id);
        let customer_id = customer.id_typed();

        execute(
            &mut customer,
            &CustomerCommand::Archive(ArchiveCustomer {
                tenant_id,
                customer_id,
                occurred_at: now(),
            }),
        )
        .unwrap();
        assert!(!customer.can_transact());

        let update = CustomerCommand::Update(UpdateCustomer {
            tenant_id,
            customer_id,
            patch: CustomerPatch {
                name: Some("Maju Jaya".into()),
                ..CustomerPatch::default()
            },
            occurred_at: now(),
        });
        assert!(matches!(customer.handle(&update), Err(DomainError::InvariantViolation(_))));

        execute(
            &mut customer,
            &CustomerCommand::Restore(RestoreCustomer {
                tenant_id,
                customer_id,
                occurred_at: now(),
            }),
        )
        .unwrap();
        execute(&mut customer, &update).unwrap();
        assert_eq!(customer.name(), "Maju Jaya");
    }

    #[test]
    fn noop_update_emits_nothing() {
        let tenant_id = TenantId::new();
        let customer = register(tenant_id);
        let events = customer
            .handle(&CustomerCommand::Update(UpdateCustomer {
                tenant_id,
                customer_id: customer.id_typed(),
                patch: CustomerPatch::default(),
                occurred_at: now(),
            }))
            .unwrap();
        assert!(events.is_empty());
    }
}
