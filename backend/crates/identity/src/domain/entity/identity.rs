//! Identity Record Entity
//!
//! One authenticable credential set. Several records may belong to the same
//! person; they are tied together by a shared group id (see [`GroupMembership`]).

use chrono::{DateTime, Utc};
use kernel::id::{GroupId, UserId};
use platform::password::HashedPassword;
use std::collections::BTreeSet;

use crate::domain::value_object::{
    AccountStatus, BackupCode, DisplayName, Email, PhoneNumber, ProviderAccount,
    RegistrationOrigin, TotpSecret,
};

/// Second-factor state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TwoFactor {
    pub secret: Option<TotpSecret>,
    pub enabled: bool,
    pub backup_codes: Vec<BackupCode>,
}

/// Denormalized identifiers of the whole group, copied onto every member
///
/// `verified_*` are always subsets of the corresponding linked set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkedIdentifiers {
    pub emails: BTreeSet<String>,
    pub phones: BTreeSet<String>,
    pub providers: BTreeSet<String>,
    pub verified_emails: BTreeSet<String>,
    pub verified_phones: BTreeSet<String>,
}

impl LinkedIdentifiers {
    /// Set union, in place
    pub fn absorb(&mut self, other: &LinkedIdentifiers) {
        self.emails.extend(other.emails.iter().cloned());
        self.phones.extend(other.phones.iter().cloned());
        self.providers.extend(other.providers.iter().cloned());
        self.verified_emails
            .extend(other.verified_emails.iter().cloned());
        self.verified_phones
            .extend(other.verified_phones.iter().cloned());
    }

    pub fn is_superset_of(&self, other: &LinkedIdentifiers) -> bool {
        self.emails.is_superset(&other.emails)
            && self.phones.is_superset(&other.phones)
            && self.providers.is_superset(&other.providers)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupMembership {
    pub group_id: GroupId,
    pub is_master: bool,
}

/// A contact point whose control can be proven with a one-time code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Email(Email),
    Phone(PhoneNumber),
}

impl Destination {
    pub fn kind(&self) -> &'static str {
        match self {
            Destination::Email(_) => "email",
            Destination::Phone(_) => "phone",
        }
    }

    /// Value safe for logs
    pub fn masked(&self) -> String {
        match self {
            Destination::Email(email) => format!("***@{}", email.domain()),
            Destination::Phone(phone) => phone.masked(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRecord {
    pub user_id: UserId,
    pub email: Option<Email>,
    pub phone_number: Option<PhoneNumber>,
    pub display_name: Option<DisplayName>,
    pub image_url: Option<String>,
    pub password_hash: Option<HashedPassword>,
    pub registration_origin: RegistrationOrigin,
    pub provider_accounts: BTreeSet<ProviderAccount>,
    pub two_factor: TwoFactor,
    pub linked: LinkedIdentifiers,
    pub group: Option<GroupMembership>,
    pub account_status: AccountStatus,
    /// Optimistic concurrency token; bumped by the store on every write
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_sign_in_at: Option<DateTime<Utc>>,
}

impl IdentityRecord {
    fn blank(origin: RegistrationOrigin, display_name: Option<DisplayName>) -> Self {
        let now = Utc::now();
        Self {
            user_id: UserId::new(),
            email: None,
            phone_number: None,
            display_name,
            image_url: None,
            password_hash: None,
            registration_origin: origin,
            provider_accounts: BTreeSet::new(),
            two_factor: TwoFactor::default(),
            linked: LinkedIdentifiers::default(),
            group: None,
            account_status: AccountStatus::Active,
            version: 0,
            created_at: now,
            updated_at: now,
            last_sign_in_at: None,
        }
    }

    /// Email + password registration; the email starts unverified
    pub fn new_password(
        email: Email,
        password_hash: HashedPassword,
        display_name: Option<DisplayName>,
    ) -> Self {
        let mut record = Self::blank(RegistrationOrigin::Password, display_name);
        record.linked.emails.insert(email.to_string());
        record.email = Some(email);
        record.password_hash = Some(password_hash);
        record
    }

    /// Phone registration; the code check already proved control
    pub fn new_phone(phone: PhoneNumber, display_name: Option<DisplayName>) -> Self {
        let mut record = Self::blank(RegistrationOrigin::Phone, display_name);
        record.linked.phones.insert(phone.to_string());
        record.linked.verified_phones.insert(phone.to_string());
        record.phone_number = Some(phone);
        record
    }

    /// OAuth registration; the provider vouches for the email
    pub fn new_oauth(
        account: ProviderAccount,
        email: Option<Email>,
        display_name: Option<DisplayName>,
        image_url: Option<String>,
    ) -> Self {
        let mut record = Self::blank(RegistrationOrigin::OAuth(account.provider()), display_name);
        if let Some(email) = email {
            record.linked.emails.insert(email.to_string());
            record.linked.verified_emails.insert(email.to_string());
            record.email = Some(email);
        }
        record.image_url = image_url;
        record.attach_provider(account);
        record
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.account_status.is_active()
    }

    #[inline]
    pub fn group_id(&self) -> Option<GroupId> {
        self.group.map(|g| g.group_id)
    }

    #[inline]
    pub fn is_master(&self) -> bool {
        self.group.is_some_and(|g| g.is_master)
    }

    pub fn shares_group_with(&self, other: &IdentityRecord) -> bool {
        matches!((self.group_id(), other.group_id()), (Some(a), Some(b)) if a == b)
    }

    pub fn is_email_verified(&self, email: &Email) -> bool {
        self.linked.verified_emails.contains(email.as_str())
    }

    /// Primary phone has passed a code check
    pub fn is_phone_verified(&self) -> bool {
        self.phone_number
            .as_ref()
            .is_some_and(|p| self.linked.verified_phones.contains(p.as_str()))
    }

    pub fn has_provider_account(&self, account: &ProviderAccount) -> bool {
        self.provider_accounts.contains(account)
    }

    /// Add a provider account; returns false if it was already attached
    pub fn attach_provider(&mut self, account: ProviderAccount) -> bool {
        self.linked
            .providers
            .insert(account.provider().as_str().to_string());
        self.provider_accounts.insert(account)
    }

    /// Record proof of control over a destination
    pub fn mark_verified(&mut self, destination: &Destination) {
        match destination {
            Destination::Email(email) => {
                self.linked.emails.insert(email.to_string());
                self.linked.verified_emails.insert(email.to_string());
            }
            Destination::Phone(phone) => {
                self.linked.phones.insert(phone.to_string());
                self.linked.verified_phones.insert(phone.to_string());
            }
        }
    }

    /// The record's own identifiers (primary contacts and provider names)
    pub fn own_identifiers(&self) -> LinkedIdentifiers {
        let mut own = LinkedIdentifiers::default();
        if let Some(email) = &self.email {
            own.emails.insert(email.to_string());
            if self.is_email_verified(email) {
                own.verified_emails.insert(email.to_string());
            }
        }
        if let Some(phone) = &self.phone_number {
            own.phones.insert(phone.to_string());
            if self.is_phone_verified() {
                own.verified_phones.insert(phone.to_string());
            }
        }
        own.providers.extend(
            self.provider_accounts
                .iter()
                .map(|a| a.provider().as_str().to_string()),
        );
        own
    }

    /// Label used as the TOTP account name
    pub fn account_label(&self) -> String {
        self.email
            .as_ref()
            .map(|e| e.to_string())
            .or_else(|| self.phone_number.as_ref().map(|p| p.to_string()))
            .unwrap_or_else(|| self.user_id.to_string())
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}
