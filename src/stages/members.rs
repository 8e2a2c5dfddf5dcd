//! Membership reconcilers for list and list-group ACLs.
//!
//! Legacy rows carry an owner column plus delimited editor/viewer id lists,
//! and the same user can appear in more than one of them. Each user keeps
//! only their strongest role (owner over editor over viewer), then the
//! stored membership set is replaced wholesale like the other association
//! reconcilers.

use std::collections::BTreeMap;

use anyhow::Result;
use sqlx::Row;

use crate::db::Db;
use crate::model::MemberRole;
use crate::normalization::idlist::parse_legacy_id_list;
use crate::resolver::{EntityKind, IdResolver};
use crate::schema;
use crate::stages::credits::replace_role_set;
use crate::stages::{CancelFlag, StageReport};

/// Strongest role per user across the three legacy ACL fields. A user named
/// as both viewer and editor ends up EDITOR; the owner always ends up OWNER.
/// The map is keyed by resolved user id, so iteration order is stable.
fn strongest_roles(
    owner: Option<i64>,
    editors: &[i64],
    viewers: &[i64],
) -> BTreeMap<i64, MemberRole> {
    let mut roles = BTreeMap::new();
    for &user_id in viewers {
        roles.entry(user_id).or_insert(MemberRole::Viewer);
    }
    for &user_id in editors {
        let entry = roles.entry(user_id).or_insert(MemberRole::Editor);
        if MemberRole::Editor > *entry {
            *entry = MemberRole::Editor;
        }
    }
    if let Some(user_id) = owner {
        roles.insert(user_id, MemberRole::Owner);
    }
    roles
}

/// Resolve one ACL id list to target user ids, counting misses as skips.
fn resolve_users(resolver: &IdResolver, raw: Option<&str>, report: &mut StageReport) -> Vec<i64> {
    parse_legacy_id_list(raw)
        .into_iter()
        .filter_map(|legacy_user_id| {
            let resolved = resolver.resolve(EntityKind::User, legacy_user_id);
            if resolved.is_none() {
                report.skip("unresolved-user");
            }
            resolved
        })
        .collect()
}

async fn reconcile_members(
    db: &Db,
    resolver: &IdResolver,
    batch_size: i64,
    cancel: &CancelFlag,
    dry_run: bool,
    stage_name: &'static str,
    staging_table: &'static str,
    owner_id_col: &'static str,
    owner_kind: EntityKind,
    member_table: &'static str,
    member_owner_col: &'static str,
) -> Result<StageReport> {
    schema::require_staging_columns(db, staging_table, &[owner_id_col, "user_id", "editors", "viewers"])
        .await?;
    let mut report = StageReport::new(stage_name);

    let mut after = i64::MIN;
    loop {
        cancel.check("batch")?;
        let rows = sqlx::query(&format!(
            "SELECT {owner_id_col}, user_id, editors, viewers
             FROM legacy.{staging_table}
             WHERE {owner_id_col} > $1
             ORDER BY {owner_id_col}
             LIMIT $2"
        ))
        .persistent(false)
        .bind(after)
        .bind(batch_size)
        .fetch_all(&db.pool)
        .await?;
        let Some(last) = rows.last() else { break };
        after = last.try_get::<i64, _>(0)?;

        for row in &rows {
            report.processed += 1;
            let legacy_owner_id: i64 = row.try_get(0)?;
            let Some(owner_id) = resolver.resolve(owner_kind, legacy_owner_id) else {
                report.skip("owner-unresolved");
                continue;
            };
            let owner_user: Option<i64> = row.try_get(1)?;
            let editors: Option<String> = row.try_get(2)?;
            let viewers: Option<String> = row.try_get(3)?;

            let owner = owner_user.and_then(|legacy_user_id| {
                let resolved = resolver.resolve(EntityKind::User, legacy_user_id);
                if resolved.is_none() {
                    report.skip("unresolved-user");
                }
                resolved
            });
            let editors = resolve_users(resolver, editors.as_deref(), &mut report);
            let viewers = resolve_users(resolver, viewers.as_deref(), &mut report);

            let roles = strongest_roles(owner, &editors, &viewers);
            let set: Vec<(i64, &'static str)> = roles
                .into_iter()
                .map(|(user_id, role)| (user_id, role.as_str()))
                .collect();

            if !dry_run {
                report.created += replace_role_set(
                    db,
                    member_table,
                    member_owner_col,
                    "user_id",
                    owner_id,
                    &set,
                )
                .await?;
            } else {
                report.created += set.len() as u64;
            }
        }
    }
    Ok(report)
}

pub async fn reconcile_list_members(
    db: &Db,
    resolver: &IdResolver,
    batch_size: i64,
    cancel: &CancelFlag,
    dry_run: bool,
) -> Result<StageReport> {
    reconcile_members(
        db,
        resolver,
        batch_size,
        cancel,
        dry_run,
        "list-members",
        "lists",
        "list_id",
        EntityKind::List,
        "list_members",
        "list_id",
    )
    .await
}

pub async fn reconcile_group_members(
    db: &Db,
    resolver: &IdResolver,
    batch_size: i64,
    cancel: &CancelFlag,
    dry_run: bool,
) -> Result<StageReport> {
    reconcile_members(
        db,
        resolver,
        batch_size,
        cancel,
        dry_run,
        "group-members",
        "group_lists",
        "group_id",
        EntityKind::ListGroup,
        "list_group_members",
        "group_id",
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn editor_beats_viewer() {
        let roles = strongest_roles(None, &[7], &[7, 9]);
        assert_eq!(roles.get(&7), Some(&MemberRole::Editor));
        assert_eq!(roles.get(&9), Some(&MemberRole::Viewer));
    }

    #[test]
    fn owner_beats_everything() {
        let roles = strongest_roles(Some(7), &[7], &[7]);
        assert_eq!(roles.len(), 1);
        assert_eq!(roles.get(&7), Some(&MemberRole::Owner));
    }

    #[test]
    fn one_row_per_user() {
        let roles = strongest_roles(Some(1), &[2, 2, 3], &[3, 2]);
        let users: Vec<i64> = roles.keys().copied().collect();
        assert_eq!(users, vec![1, 2, 3]);
        assert_eq!(roles.get(&2), Some(&MemberRole::Editor));
        assert_eq!(roles.get(&3), Some(&MemberRole::Editor));
    }

    #[test]
    fn empty_acls_yield_empty_set() {
        assert!(strongest_roles(None, &[], &[]).is_empty());
    }
}
