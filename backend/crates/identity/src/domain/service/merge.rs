//! Merge Planning
//!
//! Pure computation of a group merge. The planner reads the participants and
//! every current member of their groups and returns the full set of records
//! to write; the caller writes them in one compare-and-swap batch and replans
//! from fresh reads on conflict.
//!
//! Rules:
//! - all participants already in one group: nothing to do
//! - surviving group: the forced master's group, otherwise the group of the
//!   earliest-created grouped participant, otherwise a fresh one
//! - forced master always wins; an automatic merge keeps the surviving
//!   group's existing master and only promotes the subject for a fresh group
//! - every active member ends up with the union of all active members'
//!   linked and verified identifiers

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use kernel::id::{GroupId, UserId};

use crate::domain::entity::{GroupMembership, IdentityRecord, LinkedIdentifiers};
use crate::error::{AuthError, AuthResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterSelection {
    /// User-confirmed link: this record becomes master
    Forced(UserId),
    /// Automatic link triggered by `subject` signing in
    Auto { subject: UserId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergePlan {
    AlreadyLinked {
        group_id: GroupId,
    },
    Merge {
        group_id: GroupId,
        master_id: UserId,
        /// Records to write, each still carrying the version it was read with
        records: Vec<IdentityRecord>,
        /// Active members of the resulting group
        member_ids: Vec<UserId>,
    },
}

/// Plan the merge of `participants` (at least two, all active)
///
/// `group_members` holds every member, active or not, of any group a
/// participant currently belongs to; duplicates of participants are ignored.
pub fn plan_merge(
    participants: &[IdentityRecord],
    group_members: &[IdentityRecord],
    selection: MasterSelection,
    fresh_group_id: GroupId,
    now: DateTime<Utc>,
) -> AuthResult<MergePlan> {
    let distinct: BTreeSet<UserId> = participants.iter().map(|p| p.user_id).collect();
    if distinct.len() < 2 {
        return Err(AuthError::InvalidLinkRequest(
            "at least two distinct accounts are required",
        ));
    }
    if participants.iter().any(|p| !p.is_active()) {
        return Err(AuthError::CandidateNotFound);
    }
    if let MasterSelection::Forced(master_id) = selection {
        if !distinct.contains(&master_id) {
            return Err(AuthError::InvalidLinkRequest(
                "primary account must be a participant",
            ));
        }
    }

    let first_group = participants[0].group_id();
    if let Some(group_id) = first_group {
        if participants.iter().all(|p| p.group_id() == Some(group_id)) {
            return Ok(MergePlan::AlreadyLinked { group_id });
        }
    }

    let participant_groups: BTreeSet<GroupId> =
        participants.iter().filter_map(|p| p.group_id()).collect();

    let group_id = surviving_group(participants, selection).unwrap_or(fresh_group_id);

    // Everyone touched: participants first, then the rest of their groups
    let mut members: BTreeMap<UserId, IdentityRecord> = BTreeMap::new();
    for record in group_members
        .iter()
        .filter(|m| m.group_id().is_some_and(|g| participant_groups.contains(&g)))
    {
        members.insert(record.user_id, record.clone());
    }
    for record in participants {
        members.insert(record.user_id, record.clone());
    }

    let master_id = match selection {
        MasterSelection::Forced(master_id) => master_id,
        MasterSelection::Auto { subject } => members
            .values()
            .find(|m| m.is_active() && m.is_master() && m.group_id() == Some(group_id))
            .map(|m| m.user_id)
            .unwrap_or(subject),
    };

    let mut union = LinkedIdentifiers::default();
    for member in members.values().filter(|m| m.is_active()) {
        union.absorb(&member.linked);
        union.absorb(&member.own_identifiers());
    }

    let mut records = Vec::new();
    let mut member_ids = Vec::new();
    for (user_id, original) in members {
        let mut updated = original.clone();
        updated.group = Some(GroupMembership {
            group_id,
            is_master: user_id == master_id && updated.is_active(),
        });
        if updated.is_active() {
            updated.linked.absorb(&union);
            member_ids.push(user_id);
        }
        if updated != original {
            updated.touch(now);
            records.push(updated);
        }
    }

    Ok(MergePlan::Merge {
        group_id,
        master_id,
        records,
        member_ids,
    })
}

fn surviving_group(participants: &[IdentityRecord], selection: MasterSelection) -> Option<GroupId> {
    if let MasterSelection::Forced(master_id) = selection {
        let forced = participants
            .iter()
            .find(|p| p.user_id == master_id)
            .and_then(|p| p.group_id());
        if forced.is_some() {
            return forced;
        }
    }
    participants
        .iter()
        .filter(|p| p.group_id().is_some())
        .min_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
        })
        .and_then(|p| p.group_id())
}

/// Single active master per group, checked over one group's members
pub fn has_single_active_master(members: &[IdentityRecord]) -> bool {
    let active: Vec<&IdentityRecord> = members.iter().filter(|m| m.is_active()).collect();
    let masters = active.iter().filter(|m| m.is_master()).count();
    if active.is_empty() {
        masters == 0
    } else {
        masters == 1
    }
}
