//! Scenario tests for the identity crate
//! Use cases run against the in-memory store and in-process gateways.

#[cfg(test)]
mod support {
    use std::sync::Arc;

    use kernel::id::{GroupId, UserId};
    use platform::client::ClientContext;
    use platform::password::ClearTextPassword;

    use crate::application::{
        AuthenticateUseCase, ContactVerificationUseCase, DeactivateAccountUseCase,
        FindCandidatesUseCase, IdentityConfig, LinkAccountsUseCase, RegisterUseCase,
        SessionProjector, TwoFactorUseCase,
    };
    use crate::domain::entity::{Destination, IdentityRecord};
    use crate::domain::repository::IdentityRepository;
    use crate::domain::value_object::{
        Credential, DisplayName, Email, EmailCredential, OAuthCredential, OAuthProvider,
        PhoneCredential, PhoneNumber, ProviderAccount,
    };
    use crate::infra::{InMemoryIdentityStore, InMemoryVerificationGateway, StaticOAuthGateway};

    pub const PASSWORD: &str = "Correct-Horse-42";

    pub type Store = InMemoryIdentityStore;
    pub type Codes = InMemoryVerificationGateway;
    pub type OAuth = StaticOAuthGateway;

    pub struct Harness {
        pub store: Arc<Store>,
        pub codes: Arc<Codes>,
        pub oauth: Arc<OAuth>,
        pub config: Arc<IdentityConfig>,
    }

    impl Harness {
        pub fn new() -> Self {
            Self::with_config(IdentityConfig::with_random_secret())
        }

        pub fn with_config(config: IdentityConfig) -> Self {
            Self::with_gateway(config, Codes::new())
        }

        pub fn with_gateway(config: IdentityConfig, codes: Codes) -> Self {
            Self {
                store: Arc::new(Store::new()),
                codes: Arc::new(codes),
                oauth: Arc::new(OAuth::new()),
                config: Arc::new(config),
            }
        }

        pub fn auth(&self) -> AuthenticateUseCase<Store, Store, Codes, OAuth> {
            AuthenticateUseCase::new(
                self.store.clone(),
                self.store.clone(),
                self.codes.clone(),
                self.oauth.clone(),
                self.config.clone(),
            )
        }

        pub fn linker(&self) -> LinkAccountsUseCase<Store, Store> {
            LinkAccountsUseCase::new(self.store.clone(), self.store.clone(), self.config.clone())
        }

        pub fn finder(&self) -> FindCandidatesUseCase<Store> {
            FindCandidatesUseCase::new(self.store.clone())
        }

        pub fn deactivator(&self) -> DeactivateAccountUseCase<Store, Store> {
            DeactivateAccountUseCase::new(
                self.store.clone(),
                self.store.clone(),
                self.config.clone(),
            )
        }

        pub fn registrar(&self) -> RegisterUseCase<Store, Store, Codes> {
            RegisterUseCase::new(
                self.store.clone(),
                self.store.clone(),
                self.codes.clone(),
                self.config.clone(),
            )
        }

        pub fn contacts(&self) -> ContactVerificationUseCase<Store, Store, Codes> {
            ContactVerificationUseCase::new(
                self.store.clone(),
                self.store.clone(),
                self.codes.clone(),
                self.config.clone(),
            )
        }

        pub fn two_factor(&self) -> TwoFactorUseCase<Store, Store> {
            TwoFactorUseCase::new(self.store.clone(), self.store.clone(), self.config.clone())
        }

        pub fn projector(&self) -> SessionProjector<Store> {
            SessionProjector::new(self.store.clone(), self.config.clone())
        }

        pub async fn insert(&self, record: IdentityRecord) -> IdentityRecord {
            self.store.create(&record).await.unwrap();
            record
        }

        /// Email + password record; `verified` marks the email as proven
        pub async fn password_user(&self, email: &str, name: Option<&str>, verified: bool) -> IdentityRecord {
            let hash = ClearTextPassword::new(PASSWORD.to_string())
                .unwrap()
                .hash(None)
                .unwrap();
            let mut record =
                IdentityRecord::new_password(mail(email), hash, name.and_then(DisplayName::new));
            if verified {
                record.mark_verified(&Destination::Email(mail(email)));
            }
            self.insert(record).await
        }

        /// Verified phone record
        pub async fn phone_user(&self, number: &str, name: Option<&str>) -> IdentityRecord {
            let record = IdentityRecord::new_phone(phone(number), name.and_then(DisplayName::new));
            self.insert(record).await
        }

        pub async fn oauth_user(&self, provider: OAuthProvider, account_id: &str, email: &str) -> IdentityRecord {
            let record = IdentityRecord::new_oauth(
                ProviderAccount::new(provider, account_id).unwrap(),
                Some(mail(email)),
                None,
                None,
            );
            self.insert(record).await
        }

        pub fn current(&self, user_id: &UserId) -> IdentityRecord {
            self.store.snapshot(user_id).unwrap()
        }

        /// Every record currently in `group_id`
        pub async fn members(&self, group_id: &GroupId) -> Vec<IdentityRecord> {
            self.store.find_group_members(group_id).await.unwrap()
        }
    }

    pub fn mail(s: &str) -> Email {
        Email::new(s).unwrap()
    }

    pub fn phone(s: &str) -> PhoneNumber {
        PhoneNumber::parse(s).unwrap()
    }

    pub fn client() -> ClientContext {
        ClientContext::new(Some("203.0.113.9".parse().unwrap()), Some("tests".to_string()))
    }

    pub fn password_credential(email: &str, password: &str, code: Option<&str>) -> Credential {
        Credential::Email(EmailCredential {
            email: mail(email),
            password: ClearTextPassword::for_verification(password.to_string()),
            two_factor_code: code.map(str::to_string),
        })
    }

    pub fn phone_credential(number: &str, code: &str) -> Credential {
        Credential::Phone(PhoneCredential {
            phone_number: phone(number),
            code: code.to_string(),
        })
    }

    pub fn oauth_credential(provider: OAuthProvider, account_id: &str, email: Option<&str>) -> Credential {
        Credential::OAuth(OAuthCredential {
            provider,
            provider_account_id: account_id.to_string(),
            email: email.map(mail),
            name: None,
            image: Some("https://img.example.com/a.png".to_string()),
        })
    }

    /// Active masters per group never exceed one, and are exactly one
    /// whenever the group has an active member
    pub fn assert_single_master(members: &[IdentityRecord]) {
        let active: Vec<&IdentityRecord> = members.iter().filter(|m| m.is_active()).collect();
        let masters = active.iter().filter(|m| m.is_master()).count();
        if active.is_empty() {
            assert_eq!(masters, 0);
        } else {
            assert_eq!(masters, 1, "group must have exactly one active master");
        }
    }
}

#[cfg(test)]
mod sign_in_tests {
    use std::time::Duration;

    use super::support::*;
    use crate::application::IdentityConfig;
    use crate::domain::entity::{ActivityKind, Destination};
    use crate::domain::repository::IdentityRepository;
    use crate::domain::value_object::{BackupCode, OAuthProvider, ProviderAccount, TotpSecret};
    use crate::error::AuthError;
    use crate::infra::InMemoryVerificationGateway;

    #[tokio::test]
    async fn test_password_sign_in_issues_session() {
        let h = Harness::new();
        let user = h.password_user("a@x.com", Some("Jane Doe"), false).await;

        let output = h
            .auth()
            .execute(password_credential("A@X.com", PASSWORD, None), client())
            .await
            .unwrap();

        assert_eq!(output.principal.id, user.user_id);
        assert_eq!(output.principal.primary_account_id, user.user_id);
        assert!(!output.created);

        let claims = h.projector().decode(&output.session_token).unwrap();
        assert_eq!(claims, output.claims);
        assert_eq!(claims.to_principal(), output.principal);

        let events = h.store.events_of(ActivityKind::SigninSuccess);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].subject_id, Some(user.user_id));
        assert_eq!(events[0].metadata["ip"], "203.0.113.9");
        assert!(h.current(&user.user_id).last_sign_in_at.is_some());
    }

    #[tokio::test]
    async fn test_wrong_password_is_audited_without_subject() {
        let h = Harness::new();
        h.password_user("a@x.com", None, false).await;

        let err = h
            .auth()
            .execute(password_credential("a@x.com", "Wrong-Horse-42", None), client())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredential));

        let failed = h.store.events_of(ActivityKind::SigninFailed);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].subject_id, None);
        assert_eq!(failed[0].metadata["reason"], "invalid_credential");
        assert_eq!(failed[0].metadata["identifier"], "a@x.com");
    }

    #[tokio::test]
    async fn test_unknown_email_is_not_found() {
        let h = Harness::new();

        let err = h
            .auth()
            .execute(password_credential("nobody@x.com", PASSWORD, None), client())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NotFound));
        assert_eq!(err.public_message(), AuthError::InvalidCredential.public_message());
    }

    #[tokio::test]
    async fn test_empty_password_is_client_error() {
        let h = Harness::new();
        h.password_user("a@x.com", None, false).await;

        let err = h
            .auth()
            .execute(password_credential("a@x.com", "", None), client())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MissingCredentials("password")));
        assert!(h.store.events_of(ActivityKind::SigninFailed).is_empty());
    }

    #[tokio::test]
    async fn test_oauth_registered_account_names_provider() {
        let h = Harness::new();
        h.oauth_user(OAuthProvider::Github, "gh-1", "a@x.com").await;

        let err = h
            .auth()
            .execute(password_credential("a@x.com", PASSWORD, None), client())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::WrongProvider(OAuthProvider::Github)));
        assert!(err.public_message().contains("GitHub"));
    }

    #[tokio::test]
    async fn test_two_factor_required_when_code_missing() {
        let h = Harness::new();
        let user = h.password_user("a@x.com", None, false).await;
        h.two_factor().setup(&user.user_id).await.unwrap();
        let pending = h.current(&user.user_id);
        let code = pending
            .two_factor
            .secret
            .as_ref()
            .unwrap()
            .generate_current(&h.config.totp_issuer, &pending.account_label())
            .unwrap();
        h.two_factor().enable(&user.user_id, &code).await.unwrap();

        let err = h
            .auth()
            .execute(password_credential("a@x.com", PASSWORD, None), client())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::TwoFactorRequired));

        let err = h
            .auth()
            .execute(password_credential("a@x.com", PASSWORD, Some("000000")), client())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidTwoFactorCode));

        let record = h.current(&user.user_id);
        let code = record
            .two_factor
            .secret
            .as_ref()
            .unwrap()
            .generate_current(&h.config.totp_issuer, &record.account_label())
            .unwrap();
        let output = h
            .auth()
            .execute(password_credential("a@x.com", PASSWORD, Some(&code)), client())
            .await
            .unwrap();
        assert!(output.principal.two_factor_enabled);
    }

    #[tokio::test]
    async fn test_backup_code_is_single_use_under_concurrency() {
        let h = Harness::new();
        let mut user = h.password_user("a@x.com", None, false).await;
        let codes = BackupCode::generate_set(3);
        user.two_factor.secret = Some(TotpSecret::generate());
        user.two_factor.enabled = true;
        user.two_factor.backup_codes = codes.clone();
        h.store.compare_and_swap(&[user.clone()]).await.unwrap();

        // Lower-case input matches the stored upper-case code
        let submitted = codes[0].as_str().to_lowercase();
        let auth = h.auth();
        let (first, second) = tokio::join!(
            auth.execute(password_credential("a@x.com", PASSWORD, Some(&submitted)), client()),
            auth.execute(password_credential("a@x.com", PASSWORD, Some(&submitted)), client()),
        );

        let outcomes = [first, second];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|r| matches!(r, Err(AuthError::InvalidTwoFactorCode))));

        let remaining = h.current(&user.user_id).two_factor.backup_codes;
        assert_eq!(remaining, codes[1..].to_vec());
        assert_eq!(h.store.events_of(ActivityKind::BackupCodeUsed).len(), 1);
    }

    #[tokio::test]
    async fn test_phone_sign_in() {
        let h = Harness::new();
        let user = h.phone_user("+15551234567", None).await;
        let destination = Destination::Phone(phone("+15551234567"));

        h.codes.preset(&destination, "424242");
        let err = h
            .auth()
            .execute(phone_credential("+1 555 123 4567", "111111"), client())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidOrExpiredCode));

        let output = h
            .auth()
            .execute(phone_credential("+1 555 123 4567", "424242"), client())
            .await
            .unwrap();
        assert_eq!(output.principal.id, user.user_id);
        assert_eq!(output.principal.phone_number.as_deref(), Some("+15551234567"));
    }

    #[tokio::test]
    async fn test_unverified_phone_is_rejected() {
        let h = Harness::new();
        let mut record = h.password_user("a@x.com", None, false).await;
        record.phone_number = Some(phone("+15551234567"));
        h.store.compare_and_swap(&[record]).await.unwrap();

        let err = h
            .auth()
            .execute(phone_credential("+15551234567", "424242"), client())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::PhoneUnverified));
    }

    #[tokio::test]
    async fn test_slow_code_check_fails_closed() {
        let config = IdentityConfig {
            gateway_timeout: Duration::from_millis(20),
            ..IdentityConfig::with_random_secret()
        };
        let codes = InMemoryVerificationGateway::new().with_delay(Duration::from_millis(500));
        let h = Harness::with_gateway(config, codes);
        h.phone_user("+15551234567", None).await;
        h.codes
            .preset(&Destination::Phone(phone("+15551234567")), "424242");

        let err = h
            .auth()
            .execute(phone_credential("+15551234567", "424242"), client())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidOrExpiredCode));
    }

    #[tokio::test]
    async fn test_store_outage_is_not_an_auth_failure() {
        let h = Harness::new();
        h.password_user("a@x.com", None, false).await;
        h.store.set_unavailable(true);

        let err = h
            .auth()
            .execute(password_credential("a@x.com", PASSWORD, None), client())
            .await
            .unwrap_err();
        assert!(err.is_infrastructure());
        assert!(!err.is_auth_failure());
    }

    #[tokio::test]
    async fn test_oauth_same_email_extends_provider_list() {
        let h = Harness::new();
        let a = h.password_user("a@x.com", None, false).await;
        h.phone_user("+15551234567", None).await;

        let first = h
            .auth()
            .execute(oauth_credential(OAuthProvider::Google, "g-1", Some("a@x.com")), client())
            .await
            .unwrap();
        let second = h
            .auth()
            .execute(oauth_credential(OAuthProvider::Google, "g-2", Some("a@x.com")), client())
            .await
            .unwrap();

        for output in [&first, &second] {
            assert_eq!(output.principal.id, a.user_id);
            assert_eq!(output.principal.group_id, None);
            assert_eq!(output.auto_linked_group, None);
            assert!(!output.created);
        }

        let record = h.current(&a.user_id);
        assert!(record.has_provider_account(&ProviderAccount::new(OAuthProvider::Google, "g-1").unwrap()));
        assert!(record.has_provider_account(&ProviderAccount::new(OAuthProvider::Google, "g-2").unwrap()));
        assert!(record.is_email_verified(&mail("a@x.com")));
        assert_eq!(record.group, None);
        assert_eq!(h.store.events_of(ActivityKind::OauthLinked).len(), 2);
        assert!(h.store.events_of(ActivityKind::AccountsLinked).is_empty());
    }

    #[tokio::test]
    async fn test_oauth_creates_record_for_new_person() {
        let h = Harness::new();

        let output = h
            .auth()
            .execute(oauth_credential(OAuthProvider::Github, "gh-9", Some("new@x.com")), client())
            .await
            .unwrap();

        assert!(output.created);
        assert_eq!(output.principal.linked_providers, vec!["github".to_string()]);
        assert_eq!(output.principal.image.as_deref(), Some("https://img.example.com/a.png"));
        assert_eq!(h.store.events_of(ActivityKind::AccountCreated).len(), 1);
    }

    #[tokio::test]
    async fn test_oauth_auto_links_vouched_email_match() {
        let h = Harness::new();
        let mut b = h.phone_user("+15551234567", None).await;
        b.mark_verified(&Destination::Email(mail("a@x.com")));
        h.store.compare_and_swap(&[b.clone()]).await.unwrap();

        let output = h
            .auth()
            .execute(oauth_credential(OAuthProvider::Github, "gh-1", Some("a@x.com")), client())
            .await
            .unwrap();

        assert!(output.created);
        let group_id = output.auto_linked_group.unwrap();
        assert_eq!(output.principal.group_id, Some(group_id));
        assert!(output.principal.has_linked_accounts);
        assert_eq!(output.principal.primary_account_id, output.principal.id);
        assert!(output.principal.linked_phones.contains(&"+15551234567".to_string()));
        assert_eq!(output.claims.group_id, Some(group_id));

        let members = h.members(&group_id).await;
        assert_eq!(members.len(), 2);
        assert_single_master(&members);
        let linked = h.store.events_of(ActivityKind::AccountsLinked);
        assert_eq!(linked.len(), 1);
        assert_eq!(linked[0].metadata["trigger"], "auto");
    }

    #[tokio::test]
    async fn test_oauth_code_exchange() {
        let h = Harness::new();
        h.oauth.register(
            OAuthProvider::Google,
            "auth-code",
            crate::domain::gateway::OAuthProfile {
                provider_account_id: "g-77".to_string(),
                email: Some("Mixed@X.com".to_string()),
                name: Some("Jane Doe".to_string()),
                image: None,
            },
        );

        let output = h
            .auth()
            .authenticate_oauth_code(OAuthProvider::Google, "auth-code", client())
            .await
            .unwrap();
        assert_eq!(output.principal.email.as_deref(), Some("mixed@x.com"));
        assert_eq!(output.principal.name.as_deref(), Some("Jane Doe"));

        let err = h
            .auth()
            .authenticate_oauth_code(OAuthProvider::Google, "auth-code", client())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidOrExpiredCode));
    }

    #[tokio::test]
    async fn test_disabled_provider_is_rejected() {
        let config = IdentityConfig {
            enabled_providers: vec![OAuthProvider::Google],
            ..IdentityConfig::with_random_secret()
        };
        let h = Harness::with_config(config);

        let err = h
            .auth()
            .execute(oauth_credential(OAuthProvider::Github, "gh-1", None), client())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UnsupportedProvider(_)));
    }
}

#[cfg(test)]
mod candidate_tests {
    use chrono::{Duration, Utc};

    use super::support::*;
    use crate::application::{CandidateSearch, IdentityConfig};
    use crate::domain::entity::Destination;
    use crate::domain::repository::{CANDIDATE_SCAN_LIMIT, IdentityRepository};
    use crate::domain::value_object::DisplayName;
    use crate::error::AuthError;

    #[tokio::test]
    async fn test_name_only_match_is_never_auto_linked() {
        let h = Harness::new();
        let a = h.password_user("a@x.com", Some("Jane Doe"), false).await;
        let b = h.phone_user("+15551234567", Some("jane  DOE")).await;

        let search = CandidateSearch {
            name: DisplayName::new("Jane Doe"),
            ..Default::default()
        };
        let candidates = h.finder().execute(search.clone(), &a.user_id).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].candidate_user_id, b.user_id);
        assert_eq!(candidates[0].confidence, 10);
        assert_eq!(candidates[0].reasons, vec!["same name".to_string()]);

        let outcome = h
            .linker()
            .auto_link_if_confident(&a.user_id, search, 0)
            .await
            .unwrap();
        assert_eq!(outcome, None);
        assert_eq!(h.current(&b.user_id).group, None);
    }

    #[tokio::test]
    async fn test_below_threshold_candidate_is_listed_not_linked() {
        let h = Harness::with_config(IdentityConfig {
            auto_link_threshold: 90,
            ..IdentityConfig::with_random_secret()
        });
        let subject = h.phone_user("+15550000001", Some("Jane Doe")).await;
        let other = h.password_user("a@x.com", Some("Jane Doe"), true).await;

        let search = CandidateSearch {
            email: Some(mail("a@x.com")),
            name: DisplayName::new("Jane Doe"),
            ..Default::default()
        };
        let candidates = h.finder().execute(search.clone(), &subject.user_id).await.unwrap();
        assert_eq!(candidates[0].candidate_user_id, other.user_id);
        assert_eq!(candidates[0].confidence, 60);

        let outcome = h
            .linker()
            .auto_link_if_confident(&subject.user_id, search, 50)
            .await
            .unwrap();
        assert_eq!(outcome, None);
        assert_eq!(h.current(&other.user_id).group, None);
    }

    #[tokio::test]
    async fn test_tied_best_candidates_are_not_auto_linked() {
        let h = Harness::new();
        let subject = h.phone_user("+15550000001", None).await;
        for number in ["+15550000002", "+15550000003"] {
            let mut record = h.phone_user(number, None).await;
            record.mark_verified(&Destination::Email(mail("shared@x.com")));
            h.store.compare_and_swap(&[record]).await.unwrap();
        }

        let search = CandidateSearch {
            email: Some(mail("shared@x.com")),
            email_vouched: true,
            ..Default::default()
        };
        let candidates = h.finder().execute(search.clone(), &subject.user_id).await.unwrap();
        assert_eq!(candidates.len(), 2);
        assert!(candidates.iter().all(|c| c.confidence == 100));

        let outcome = h
            .linker()
            .auto_link_if_confident(&subject.user_id, search, 95)
            .await
            .unwrap();
        assert_eq!(outcome, None);
    }

    #[tokio::test]
    async fn test_group_members_are_excluded() {
        let h = Harness::new();
        let a = h.password_user("a@x.com", Some("Jane Doe"), false).await;
        let b = h.phone_user("+15551234567", Some("Jane Doe")).await;
        h.linker().link_accounts(&a.user_id, &[b.user_id]).await.unwrap();

        let candidates = h.finder().for_user(&a.user_id).await.unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn test_verified_match_survives_scan_limit() {
        let h = Harness::new();
        let subject = h.phone_user("+15550000001", Some("John Smith")).await;
        let mut owner = h.phone_user("+15550000002", Some("John Smith")).await;
        owner.mark_verified(&Destination::Email(mail("john@x.com")));
        owner.last_sign_in_at = Some(Utc::now() - Duration::days(365));
        h.store.compare_and_swap(&[owner.clone()]).await.unwrap();

        // A full page of recently active namesakes
        for i in 0..CANDIDATE_SCAN_LIMIT {
            let mut namesake = h
                .phone_user(&format!("+1555100{i:04}"), Some("John Smith"))
                .await;
            namesake.last_sign_in_at = Some(Utc::now());
            h.store.compare_and_swap(&[namesake]).await.unwrap();
        }

        let search = CandidateSearch {
            email: Some(mail("john@x.com")),
            name: DisplayName::new("John Smith"),
            ..Default::default()
        };
        let candidates = h.finder().execute(search, &subject.user_id).await.unwrap();
        assert_eq!(candidates.len(), CANDIDATE_SCAN_LIMIT);
        assert_eq!(candidates[0].candidate_user_id, owner.user_id);
        assert_eq!(candidates[0].confidence, 60);
        assert!(candidates[1..].iter().all(|c| c.confidence == 10));
    }

    #[tokio::test]
    async fn test_confirmation_requires_verified_match() {
        let h = Harness::new();
        let a = h.password_user("a@x.com", Some("Jane Doe"), false).await;
        let mut b = h.phone_user("+15550000002", Some("Jane Doe")).await;
        b.mark_verified(&Destination::Email(mail("a@x.com")));
        h.store.compare_and_swap(&[b.clone()]).await.unwrap();
        let namesake = h.phone_user("+15550000003", Some("Jane Doe")).await;
        let stranger = h.password_user("d@x.com", None, true).await;

        let err = h
            .finder()
            .check_confirmable(&a.user_id, &[namesake.user_id])
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidLinkRequest(_)));

        let err = h
            .finder()
            .check_confirmable(&a.user_id, &[stranger.user_id])
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::CandidateNotFound));

        h.finder()
            .check_confirmable(&a.user_id, &[b.user_id])
            .await
            .unwrap();

        // Once linked, b is no longer a candidate but stays confirmable
        h.linker().link_accounts(&a.user_id, &[b.user_id]).await.unwrap();
        let offered = h.finder().for_user(&a.user_id).await.unwrap();
        assert!(offered.iter().all(|c| c.candidate_user_id != b.user_id));
        h.finder()
            .check_confirmable(&a.user_id, &[b.user_id])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unverified_email_scores_zero_with_reason() {
        let h = Harness::new();
        let subject = h.phone_user("+15550000001", None).await;
        h.password_user("a@x.com", None, false).await;

        let search = CandidateSearch {
            email: Some(mail("a@x.com")),
            ..Default::default()
        };
        let candidates = h.finder().execute(search, &subject.user_id).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].confidence, 0);
        assert_eq!(candidates[0].reasons, vec!["unverified email match".to_string()]);
    }
}

#[cfg(test)]
mod linking_tests {
    use std::collections::BTreeSet;

    use kernel::id::UserId;

    use super::support::*;
    use crate::application::LinkOutcome;
    use crate::domain::entity::ActivityKind;
    use crate::domain::value_object::{OAuthProvider, ProviderAccount};
    use crate::error::AuthError;

    #[tokio::test]
    async fn test_link_is_idempotent() {
        let h = Harness::new();
        let a = h.password_user("a@x.com", None, true).await;
        let b = h.phone_user("+15551234567", None).await;

        let first = h.linker().link_accounts(&a.user_id, &[b.user_id]).await.unwrap();
        let LinkOutcome::Linked {
            group_id,
            master_id,
            member_ids,
        } = first
        else {
            panic!("expected a merge");
        };
        assert_eq!(master_id, a.user_id);
        assert_eq!(member_ids.len(), 2);
        let after_first = (h.current(&a.user_id), h.current(&b.user_id));

        let second = h.linker().link_accounts(&a.user_id, &[b.user_id]).await.unwrap();
        assert_eq!(second, LinkOutcome::AlreadyLinked { group_id });
        assert_eq!((h.current(&a.user_id), h.current(&b.user_id)), after_first);
        assert_eq!(h.store.events_of(ActivityKind::AccountsLinked).len(), 1);
    }

    #[tokio::test]
    async fn test_union_is_written_to_every_member() {
        let h = Harness::new();
        let a = h.password_user("a@x.com", None, true).await;
        let b = h.phone_user("+15551234567", None).await;
        let c = h.oauth_user(OAuthProvider::Github, "gh-1", "c@x.com").await;

        let before: Vec<_> = [&a, &b, &c].iter().map(|r| r.linked.clone()).collect();
        let outcome = h
            .linker()
            .link_accounts(&a.user_id, &[b.user_id, c.user_id])
            .await
            .unwrap();

        let members = h.members(&outcome.group_id()).await;
        assert_eq!(members.len(), 3);
        assert_single_master(&members);
        for member in &members {
            for linked in &before {
                assert!(member.linked.is_superset_of(linked));
            }
            assert!(member.linked.providers.contains("github"));
            assert!(member.linked.phones.contains("+15551234567"));
        }
    }

    #[tokio::test]
    async fn test_oauth_attach_reaches_whole_group() {
        let h = Harness::new();
        let a = h.password_user("a@x.com", None, false).await;
        let b = h.phone_user("+15551234567", None).await;
        let group_id = h
            .linker()
            .link_accounts(&a.user_id, &[b.user_id])
            .await
            .unwrap()
            .group_id();

        let output = h
            .auth()
            .execute(oauth_credential(OAuthProvider::Github, "gh-7", Some("a@x.com")), client())
            .await
            .unwrap();
        assert_eq!(output.principal.id, a.user_id);
        assert!(!output.created);
        assert!(output.principal.linked_providers.contains(&"github".to_string()));

        let a = h.current(&a.user_id);
        assert!(a.has_provider_account(&ProviderAccount::new(OAuthProvider::Github, "gh-7").unwrap()));
        assert!(a.is_email_verified(&mail("a@x.com")));

        let b = h.current(&b.user_id);
        assert!(b.linked.providers.contains("github"));
        assert!(b.linked.verified_emails.contains("a@x.com"));
        assert!(b.provider_accounts.is_empty());

        let members = h.members(&group_id).await;
        assert_single_master(&members);
        assert_eq!(members[0].linked, members[1].linked);
    }

    #[tokio::test]
    async fn test_overlapping_links_race_to_one_group() {
        let h = Harness::new();
        let a = h.password_user("a@x.com", None, true).await;
        let b = h.phone_user("+15551234567", None).await;
        let c = h.oauth_user(OAuthProvider::Github, "gh-1", "c@x.com").await;
        let before: Vec<_> = [&a, &b, &c].iter().map(|r| r.linked.clone()).collect();

        let shared = [b.user_id];
        let (left, right) = (h.linker(), h.linker());
        let (first, second) = tokio::join!(
            left.link_accounts(&a.user_id, &shared),
            right.link_accounts(&c.user_id, &shared),
        );
        first.unwrap();
        second.unwrap();

        let group_id = h.current(&b.user_id).group_id().unwrap();
        let members = h.members(&group_id).await;
        let ids: BTreeSet<UserId> = members.iter().map(|m| m.user_id).collect();
        assert_eq!(ids, BTreeSet::from([a.user_id, b.user_id, c.user_id]));
        assert_single_master(&members);
        for member in &members {
            for linked in &before {
                assert!(member.linked.is_superset_of(linked));
            }
        }
    }

    #[tokio::test]
    async fn test_groups_merge_under_forced_master() {
        let h = Harness::new();
        let a = h.password_user("a@x.com", None, false).await;
        let b = h.password_user("b@x.com", None, false).await;
        let c = h.password_user("c@x.com", None, false).await;
        let d = h.password_user("d@x.com", None, false).await;
        let first = h.linker().link_accounts(&a.user_id, &[b.user_id]).await.unwrap();
        let second = h.linker().link_accounts(&c.user_id, &[d.user_id]).await.unwrap();
        assert_ne!(first.group_id(), second.group_id());

        let merged = h.linker().link_accounts(&c.user_id, &[a.user_id]).await.unwrap();
        assert_eq!(merged.group_id(), second.group_id());

        let members = h.members(&merged.group_id()).await;
        let ids: BTreeSet<UserId> = members.iter().map(|m| m.user_id).collect();
        assert_eq!(
            ids,
            BTreeSet::from([a.user_id, b.user_id, c.user_id, d.user_id])
        );
        assert_single_master(&members);
        assert!(h.current(&c.user_id).is_master());
        assert!(h.members(&first.group_id()).await.is_empty());
    }

    #[tokio::test]
    async fn test_principal_carries_group_aggregate() {
        let h = Harness::new();
        let a = h.password_user("a@x.com", Some("Jane Master"), false).await;
        let b = h.phone_user("+15551234567", Some("Jane Phone")).await;
        h.linker().link_accounts(&a.user_id, &[b.user_id]).await.unwrap();
        h.codes.preset(
            &crate::domain::entity::Destination::Phone(phone("+15551234567")),
            "424242",
        );

        let output = h
            .auth()
            .execute(phone_credential("+15551234567", "424242"), client())
            .await
            .unwrap();
        let principal = output.principal;
        assert_eq!(principal.id, b.user_id);
        assert_eq!(principal.primary_account_id, a.user_id);
        assert_eq!(principal.name.as_deref(), Some("Jane Master"));
        assert!(principal.has_linked_accounts);
        assert!(principal.linked_emails.contains(&"a@x.com".to_string()));
    }

    #[tokio::test]
    async fn test_invalid_link_requests() {
        let h = Harness::new();
        let a = h.password_user("a@x.com", None, false).await;

        let err = h.linker().link_accounts(&a.user_id, &[]).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidLinkRequest(_)));

        let err = h
            .linker()
            .link_accounts(&a.user_id, &[a.user_id])
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidLinkRequest(_)));

        let err = h
            .linker()
            .link_accounts(&a.user_id, &[UserId::new()])
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::CandidateNotFound));
    }

    #[tokio::test]
    async fn test_conflicts_retry_then_surface() {
        let h = Harness::new();
        let a = h.password_user("a@x.com", None, false).await;
        let b = h.password_user("b@x.com", None, false).await;

        h.store.inject_conflicts(h.config.merge_max_attempts);
        let err = h
            .linker()
            .link_accounts(&a.user_id, &[b.user_id])
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::StoreConflict));
        assert_eq!(h.current(&a.user_id).group, None);

        h.store.inject_conflicts(1);
        let outcome = h.linker().link_accounts(&a.user_id, &[b.user_id]).await.unwrap();
        assert!(matches!(outcome, LinkOutcome::Linked { .. }));
    }
}

#[cfg(test)]
mod deactivation_tests {
    use super::support::*;
    use crate::application::DeactivateOptions;
    use crate::domain::entity::ActivityKind;
    use crate::error::AuthError;

    #[tokio::test]
    async fn test_master_requires_transfer() {
        let h = Harness::new();
        let a = h.password_user("a@x.com", None, false).await;
        let b = h.password_user("b@x.com", None, false).await;
        let c = h.password_user("c@x.com", None, false).await;
        let group_id = h
            .linker()
            .link_accounts(&a.user_id, &[b.user_id, c.user_id])
            .await
            .unwrap()
            .group_id();

        let err = h
            .deactivator()
            .execute(&a.user_id, DeactivateOptions::default())
            .await
            .unwrap_err();
        let AuthError::RequiresTransfer { active_members } = err else {
            panic!("expected RequiresTransfer");
        };
        assert_eq!(active_members.len(), 2);
        assert!(active_members.contains(&b.user_id));
        assert!(active_members.contains(&c.user_id));
        assert!(h.current(&a.user_id).is_active());

        let output = h
            .deactivator()
            .execute(
                &a.user_id,
                DeactivateOptions {
                    transfer_ownership: true,
                    transfer_to: Some(c.user_id),
                },
            )
            .await
            .unwrap();
        assert_eq!(output.new_master_id, Some(c.user_id));

        let members = h.members(&group_id).await;
        assert_single_master(&members);
        assert!(h.current(&c.user_id).is_master());
        assert!(!h.current(&a.user_id).is_active());
        assert_eq!(h.store.events_of(ActivityKind::OwnershipTransferred).len(), 1);
    }

    #[tokio::test]
    async fn test_transfer_target_must_be_active_member() {
        let h = Harness::new();
        let a = h.password_user("a@x.com", None, false).await;
        let b = h.password_user("b@x.com", None, false).await;
        let outsider = h.password_user("z@x.com", None, false).await;
        h.linker().link_accounts(&a.user_id, &[b.user_id]).await.unwrap();

        let err = h
            .deactivator()
            .execute(
                &a.user_id,
                DeactivateOptions {
                    transfer_ownership: true,
                    transfer_to: Some(outsider.user_id),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidTransferTarget));
    }

    #[tokio::test]
    async fn test_non_master_leaves_group_of_one() {
        let h = Harness::new();
        let a = h.password_user("a@x.com", None, false).await;
        let b = h.password_user("b@x.com", None, false).await;
        let group_id = h
            .linker()
            .link_accounts(&a.user_id, &[b.user_id])
            .await
            .unwrap()
            .group_id();

        let output = h
            .deactivator()
            .execute(&b.user_id, DeactivateOptions::default())
            .await
            .unwrap();
        assert_eq!(output.new_master_id, None);
        assert_single_master(&h.members(&group_id).await);

        let principal = h
            .auth()
            .execute(password_credential("a@x.com", PASSWORD, None), client())
            .await
            .unwrap()
            .principal;
        assert_eq!(principal.group_id, Some(group_id));
        assert!(!principal.has_linked_accounts);
    }

    #[tokio::test]
    async fn test_deactivated_account_cannot_sign_in_and_frees_email() {
        let h = Harness::new();
        let a = h.password_user("a@x.com", None, false).await;
        h.deactivator()
            .execute(&a.user_id, DeactivateOptions::default())
            .await
            .unwrap();

        let err = h
            .auth()
            .execute(password_credential("a@x.com", PASSWORD, None), client())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NotFound));

        // Uniqueness only binds active records
        h.password_user("a@x.com", None, false).await;
    }
}

#[cfg(test)]
mod registration_tests {
    use super::support::*;
    use crate::application::RegisterInput;
    use crate::domain::entity::{ActivityKind, Destination};
    use crate::error::AuthError;

    fn email_input(email: &str, password: &str) -> RegisterInput {
        RegisterInput {
            email: Some(email.to_string()),
            password: Some(password.to_string()),
            name: Some("Jane Doe".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_email_registration() {
        let h = Harness::new();
        let output = h
            .registrar()
            .execute(email_input("New@X.com", PASSWORD))
            .await
            .unwrap();

        assert_eq!(output.principal.email.as_deref(), Some("new@x.com"));
        let record = h.current(&output.principal.id);
        assert!(!record.is_email_verified(&mail("new@x.com")));
        assert_eq!(h.store.events_of(ActivityKind::AccountCreated).len(), 1);

        let err = h
            .registrar()
            .execute(email_input("new@x.com", PASSWORD))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::EmailTaken));
    }

    #[tokio::test]
    async fn test_weak_password_is_rejected() {
        let h = Harness::new();
        let err = h
            .registrar()
            .execute(email_input("a@x.com", "short"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::PasswordPolicy(_)));
    }

    #[tokio::test]
    async fn test_phone_registration_returns_candidates() {
        let h = Harness::new();
        let existing = h.password_user("a@x.com", Some("Jane Doe"), false).await;
        let destination = Destination::Phone(phone("+15551234567"));

        let input = || RegisterInput {
            phone_number: Some("+1 (555) 123-4567".to_string()),
            phone_code: Some("424242".to_string()),
            name: Some("Jane Doe".to_string()),
            ..Default::default()
        };

        let err = h.registrar().execute(input()).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidOrExpiredCode));

        h.codes.preset(&destination, "424242");
        let output = h.registrar().execute(input()).await.unwrap();
        let record = h.current(&output.principal.id);
        assert!(record.is_phone_verified());
        assert_eq!(output.candidates.len(), 1);
        assert_eq!(output.candidates[0].candidate_user_id, existing.user_id);
        assert_eq!(record.group, None);

        h.codes.preset(&destination, "525252");
        let err = h
            .registrar()
            .execute(RegisterInput {
                phone_code: Some("525252".to_string()),
                ..input()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::PhoneTaken));
    }

    #[tokio::test]
    async fn test_phone_registration_requires_code() {
        let h = Harness::new();
        let err = h
            .registrar()
            .execute(RegisterInput {
                phone_number: Some("+15551234567".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MissingCredentials("phoneCode")));
    }
}

#[cfg(test)]
mod contact_tests {
    use super::support::*;
    use crate::domain::entity::{ActivityKind, Destination};
    use crate::error::AuthError;

    #[tokio::test]
    async fn test_confirmed_email_reaches_whole_group() {
        let h = Harness::new();
        let a = h.password_user("a@x.com", None, false).await;
        let b = h.phone_user("+15551234567", None).await;
        h.linker().link_accounts(&a.user_id, &[b.user_id]).await.unwrap();

        let destination = Destination::Email(mail("a@x.com"));
        h.contacts().send_code(&destination).await.unwrap();
        let code = h.codes.last_code(&destination).unwrap();

        let err = h
            .contacts()
            .confirm(&a.user_id, &destination, "not-it")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidOrExpiredCode));

        let principal = h.contacts().confirm(&a.user_id, &destination, &code).await.unwrap();
        assert!(principal.linked_emails.contains(&"a@x.com".to_string()));
        assert!(h.current(&a.user_id).is_email_verified(&mail("a@x.com")));
        assert!(h.current(&b.user_id).is_email_verified(&mail("a@x.com")));
        assert_eq!(h.store.events_of(ActivityKind::ContactVerified).len(), 1);
    }
}

#[cfg(test)]
mod two_factor_tests {
    use super::support::*;
    use crate::domain::entity::ActivityKind;
    use crate::error::AuthError;

    async fn current_code(h: &Harness, user_id: &kernel::id::UserId) -> String {
        let record = h.current(user_id);
        record
            .two_factor
            .secret
            .as_ref()
            .unwrap()
            .generate_current(&h.config.totp_issuer, &record.account_label())
            .unwrap()
    }

    #[tokio::test]
    async fn test_enable_disable_cycle() {
        let h = Harness::new();
        let user = h.password_user("a@x.com", None, false).await;

        let setup = h.two_factor().setup(&user.user_id).await.unwrap();
        assert!(setup.otpauth_url.starts_with("otpauth://totp/"));
        assert!(!h.current(&user.user_id).two_factor.enabled);

        let err = h
            .two_factor()
            .enable(&user.user_id, "000000")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidTwoFactorCode));

        let code = current_code(&h, &user.user_id).await;
        let backup = h.two_factor().enable(&user.user_id, &code).await.unwrap();
        assert_eq!(backup.len(), h.config.backup_code_count);
        assert!(h.current(&user.user_id).two_factor.enabled);

        let err = h.two_factor().setup(&user.user_id).await.unwrap_err();
        assert!(matches!(err, AuthError::TwoFactorAlreadyEnabled));

        // Regeneration takes a TOTP code only
        let err = h
            .two_factor()
            .regenerate_backup_codes(&user.user_id, backup[0].as_str())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidTwoFactorCode));

        h.two_factor()
            .disable(&user.user_id, backup[0].as_str())
            .await
            .unwrap();
        let record = h.current(&user.user_id);
        assert!(!record.two_factor.enabled);
        assert!(record.two_factor.secret.is_none());
        assert!(record.two_factor.backup_codes.is_empty());
        assert_eq!(h.store.events_of(ActivityKind::TwoFactorDisabled).len(), 1);
    }

    #[tokio::test]
    async fn test_regenerate_replaces_codes() {
        let h = Harness::new();
        let user = h.password_user("a@x.com", None, false).await;
        h.two_factor().setup(&user.user_id).await.unwrap();
        let code = current_code(&h, &user.user_id).await;
        let old = h.two_factor().enable(&user.user_id, &code).await.unwrap();

        let code = current_code(&h, &user.user_id).await;
        let new = h
            .two_factor()
            .regenerate_backup_codes(&user.user_id, &code)
            .await
            .unwrap();
        assert_eq!(new.len(), old.len());
        assert_eq!(h.current(&user.user_id).two_factor.backup_codes, new);
        assert_eq!(
            h.store.events_of(ActivityKind::BackupCodesRegenerated).len(),
            1
        );
    }
}

#[cfg(test)]
mod session_tests {
    use std::time::Duration;

    use super::support::*;
    use crate::application::{DeactivateOptions, IdentityConfig};
    use crate::domain::entity::Principal;
    use crate::error::AuthError;

    #[tokio::test]
    async fn test_tampered_token_is_rejected() {
        let h = Harness::new();
        let user = h.password_user("a@x.com", None, false).await;
        let (_, token) = h
            .projector()
            .issue(Principal::aggregate(&user, &[]))
            .unwrap();

        let (payload, mac) = token.split_once('.').unwrap();
        let forged = format!("{payload}x.{mac}");
        assert!(matches!(
            h.projector().decode(&forged),
            Err(AuthError::SessionInvalid)
        ));
        assert!(matches!(
            h.projector().decode("garbage"),
            Err(AuthError::SessionInvalid)
        ));
    }

    #[tokio::test]
    async fn test_expired_token_is_rejected() {
        let mut config = IdentityConfig::with_random_secret();
        config.session.ttl = Duration::ZERO;
        let h = Harness::with_config(config);
        let user = h.password_user("a@x.com", None, false).await;

        let (_, token) = h
            .projector()
            .issue(Principal::aggregate(&user, &[]))
            .unwrap();
        assert!(matches!(
            h.projector().decode(&token),
            Err(AuthError::SessionInvalid)
        ));
    }

    #[tokio::test]
    async fn test_refresh_follows_group_state() {
        let h = Harness::new();
        let a = h.password_user("a@x.com", None, false).await;
        let b = h.password_user("b@x.com", None, false).await;
        let (issued, token) = h.projector().issue(Principal::aggregate(&a, &[])).unwrap();
        assert!(!issued.has_linked_accounts);

        let group_id = h
            .linker()
            .link_accounts(&b.user_id, &[a.user_id])
            .await
            .unwrap()
            .group_id();

        let (refreshed, _) = h.projector().refresh(&token).await.unwrap();
        assert_eq!(refreshed.group_id, Some(group_id));
        assert_eq!(refreshed.primary_account_id, b.user_id);
        assert!(refreshed.has_linked_accounts);
        assert_eq!((refreshed.iat, refreshed.exp), (issued.iat, issued.exp));

        h.deactivator()
            .execute(&a.user_id, DeactivateOptions::default())
            .await
            .unwrap();
        assert!(matches!(
            h.projector().refresh(&token).await,
            Err(AuthError::SessionInvalid)
        ));
    }
}

#[cfg(test)]
mod router_tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::support::*;
    use crate::application::IdentityConfig;
    use crate::domain::entity::Destination;
    use crate::domain::repository::IdentityRepository;
    use crate::infra::{InMemoryIdentityStore, InMemoryVerificationGateway, StaticOAuthGateway};
    use crate::presentation::{IdentityAppState, identity_router_generic};

    type TestState =
        IdentityAppState<InMemoryIdentityStore, InMemoryVerificationGateway, StaticOAuthGateway>;

    fn test_state() -> TestState {
        IdentityAppState::new(
            InMemoryIdentityStore::new(),
            InMemoryVerificationGateway::new(),
            StaticOAuthGateway::new(),
            IdentityConfig::development(),
        )
    }

    fn router() -> axum::Router {
        identity_router_generic(test_state())
    }

    fn post(uri: &str, body: Value, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn register(app: &axum::Router, email: &str, name: &str) {
        let response = app
            .clone()
            .oneshot(post(
                "/register",
                json!({ "email": email, "password": PASSWORD, "name": name }),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    /// Session cookie pair (`name=value`) for a password sign-in
    async fn sign_in(app: &axum::Router, email: &str) -> String {
        let response = app
            .clone()
            .oneshot(post(
                "/signin/password",
                json!({ "email": email, "password": PASSWORD }),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        cookie.split(';').next().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_register_then_sign_in_sets_cookie() {
        let app = router();

        let response = app
            .clone()
            .oneshot(post(
                "/register",
                json!({ "email": "a@x.com", "password": PASSWORD, "name": "Jane Doe" }),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = json_body(response).await;
        assert_eq!(body["principal"]["email"], "a@x.com");
        assert_eq!(body["candidates"], json!([]));

        let response = app
            .clone()
            .oneshot(post(
                "/signin/password",
                json!({ "email": "a@x.com", "password": PASSWORD }),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(cookie.starts_with("identity_session="));
        assert!(cookie.contains("HttpOnly"));

        let pair = cookie.split(';').next().unwrap().to_string();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/links/candidates")
                    .header(header::COOKIE, pair)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["candidates"], json!([]));
    }

    #[tokio::test]
    async fn test_repeated_link_confirmation_succeeds() {
        let state = test_state();
        let app = identity_router_generic(state.clone());
        register(&app, "a@x.com", "Jane Doe").await;
        register(&app, "b@x.com", "Jane Doe").await;
        register(&app, "c@x.com", "Jane Doe").await;

        // b has also proven control of a's address
        let mut b = state
            .store
            .find_active_by_email(&mail("b@x.com"))
            .await
            .unwrap()
            .unwrap();
        b.mark_verified(&Destination::Email(mail("a@x.com")));
        state.store.compare_and_swap(&[b.clone()]).await.unwrap();
        let c = state
            .store
            .find_active_by_email(&mail("c@x.com"))
            .await
            .unwrap()
            .unwrap();

        let cookie = sign_in(&app, "a@x.com").await;
        let link = json!({ "secondaryAccountIds": [b.user_id.to_string()] });

        let response = app
            .clone()
            .oneshot(post("/links", link.clone(), Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let first = json_body(response).await;
        assert_eq!(first["alreadyLinked"], false);

        let response = app
            .clone()
            .oneshot(post("/links", link, Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let second = json_body(response).await;
        assert_eq!(second["alreadyLinked"], true);
        assert_eq!(second["groupId"], first["groupId"]);

        // A shared name alone is not enough to absorb an account
        let response = app
            .oneshot(post(
                "/links",
                json!({ "secondaryAccountIds": [c.user_id.to_string()] }),
                Some(&cookie),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.store.snapshot(&c.user_id).unwrap().group, None);
    }

    #[tokio::test]
    async fn test_protected_route_requires_session() {
        let response = router()
            .oneshot(post("/two-factor/setup", json!({}), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()["X-Auth-Required"], "true");

        let response = router()
            .oneshot(post("/two-factor/setup", json!({}), Some("identity_session=forged.token")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_wrong_password_is_generic_problem() {
        let app = router();
        app.clone()
            .oneshot(post(
                "/register",
                json!({ "email": "a@x.com", "password": PASSWORD }),
                None,
            ))
            .await
            .unwrap();

        let wrong = app
            .clone()
            .oneshot(post(
                "/signin/password",
                json!({ "email": "a@x.com", "password": "Wrong-Horse-42" }),
                None,
            ))
            .await
            .unwrap();
        let unknown = app
            .oneshot(post(
                "/signin/password",
                json!({ "email": "b@x.com", "password": "Wrong-Horse-42" }),
                None,
            ))
            .await
            .unwrap();

        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
        let wrong = json_body(wrong).await;
        let unknown = json_body(unknown).await;
        assert_eq!(wrong["detail"], unknown["detail"]);
    }
}
