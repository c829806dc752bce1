//! Candidate Scoring
//!
//! Pure confidence computation for link candidates. Additive, capped at 100.
//! Name agreement is a tie-breaker only and can never reach an auto-link
//! threshold on its own.

use std::cmp::Ordering;

use crate::domain::entity::{
    AttributeType, CandidateQuery, IdentityRecord, LinkCandidate, MatchedAttribute,
};

pub const VERIFIED_EMAIL_WEIGHT: u8 = 50;
pub const VERIFIED_PHONE_WEIGHT: u8 = 50;
pub const PROVIDER_ACCOUNT_WEIGHT: u8 = 60;
pub const NAME_WEIGHT: u8 = 10;
/// Extra weight when the query email was vouched by an OAuth provider and
/// the candidate has also proven control of it
pub const VOUCHED_EMAIL_BONUS: u8 = 50;
pub const MAX_CONFIDENCE: u8 = 100;

/// Score one record against the query
///
/// `email_vouched` is true when the query email comes from an OAuth profile.
/// Returns `None` if the record shares no attribute with the query.
pub fn score_candidate(
    query: &CandidateQuery,
    email_vouched: bool,
    record: &IdentityRecord,
) -> Option<LinkCandidate> {
    let mut total: u16 = 0;
    let mut matched = Vec::new();
    let mut reasons = Vec::new();

    if let Some(email) = &query.email {
        let held = record.email.as_ref() == Some(email)
            || record.linked.emails.contains(email.as_str());
        if held {
            let verified = record.is_email_verified(email);
            if verified {
                total += u16::from(VERIFIED_EMAIL_WEIGHT);
                reasons.push("email match".to_string());
                if email_vouched {
                    total += u16::from(VOUCHED_EMAIL_BONUS);
                    reasons.push("provider-verified email".to_string());
                }
            } else {
                reasons.push("unverified email match".to_string());
            }
            matched.push(MatchedAttribute {
                attribute_type: AttributeType::Email,
                value: email.to_string(),
                verified,
            });
        }
    }

    if let Some(phone) = &query.phone {
        let held = record.phone_number.as_ref() == Some(phone)
            || record.linked.phones.contains(phone.as_str());
        if held {
            let verified = record.linked.verified_phones.contains(phone.as_str());
            if verified {
                total += u16::from(VERIFIED_PHONE_WEIGHT);
                reasons.push("phone match".to_string());
            } else {
                reasons.push("unverified phone match".to_string());
            }
            matched.push(MatchedAttribute {
                attribute_type: AttributeType::Phone,
                value: phone.masked(),
                verified,
            });
        }
    }

    if let Some(account) = &query.provider_account {
        if record.has_provider_account(account) {
            total += u16::from(PROVIDER_ACCOUNT_WEIGHT);
            reasons.push(format!("same {} account", account.provider().label()));
            matched.push(MatchedAttribute {
                attribute_type: AttributeType::ProviderAccount,
                value: account.provider().to_string(),
                verified: true,
            });
        }
    }

    if let (Some(name), Some(candidate_name)) = (&query.name, &record.display_name) {
        if name.matches(candidate_name) {
            total += u16::from(NAME_WEIGHT);
            reasons.push("same name".to_string());
            matched.push(MatchedAttribute {
                attribute_type: AttributeType::Name,
                value: candidate_name.original().to_string(),
                verified: false,
            });
        }
    }

    if matched.is_empty() {
        return None;
    }

    Some(LinkCandidate {
        candidate_user_id: record.user_id,
        matched_attributes: matched,
        confidence: total.min(u16::from(MAX_CONFIDENCE)) as u8,
        reasons,
        last_active_at: record.last_sign_in_at.or(Some(record.updated_at)),
    })
}

/// Confidence descending, then most recently active, then id for stability
pub fn rank(candidates: &mut [LinkCandidate]) {
    candidates.sort_by(|a, b| {
        b.confidence
            .cmp(&a.confidence)
            .then_with(|| b.last_active_at.cmp(&a.last_active_at))
            .then_with(|| a.candidate_user_id.cmp(&b.candidate_user_id))
    });
}

/// Score, drop non-matches, rank
pub fn score_all<'a>(
    query: &CandidateQuery,
    email_vouched: bool,
    records: impl IntoIterator<Item = &'a IdentityRecord>,
) -> Vec<LinkCandidate> {
    let mut candidates: Vec<LinkCandidate> = records
        .into_iter()
        .filter(|r| r.is_active())
        .filter(|r| !query.exclude_user_ids.contains(&r.user_id))
        .filter(|r| match (query.exclude_group, r.group_id()) {
            (Some(excluded), Some(group)) => excluded != group,
            _ => true,
        })
        .filter_map(|r| score_candidate(query, email_vouched, r))
        .collect();
    rank(&mut candidates);
    candidates
}

/// The single best candidate, if it clears `min_confidence` and is not tied
/// with another candidate at the same score
pub fn best_above(candidates: &[LinkCandidate], min_confidence: u8) -> Option<&LinkCandidate> {
    let best = candidates.first()?;
    if best.confidence < min_confidence {
        return None;
    }
    match candidates.get(1).map(|second| second.confidence.cmp(&best.confidence)) {
        Some(Ordering::Equal) => None,
        _ => Some(best),
    }
}
