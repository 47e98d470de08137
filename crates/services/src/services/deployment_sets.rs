//! Deployment-set resolution.
//!
//! Resolves a set hierarchy into an ordered, deduplicated flat list of
//! artifact UUIDs via depth-first traversal. The DFS itself operates on
//! in-memory maps so the traversal logic is testable without a database;
//! the DB-backed path collects reachable rows first, then runs the same DFS.

use std::collections::{HashMap, HashSet, VecDeque};

use db::models::deployment_set::DeploymentSetMember;
use db::models::group::GroupArtifact;
use db::DBService;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

pub const DEFAULT_DEPTH_LIMIT: usize = 20;

#[derive(Debug, Error)]
pub enum SetResolutionError {
    #[error(
        "deployment set resolution depth limit ({depth_limit}) exceeded at set '{set_id}'; \
         traversal path: {path:?}"
    )]
    DepthExceeded {
        set_id: Uuid,
        path: Vec<Uuid>,
        depth_limit: usize,
    },
    #[error("This would create a circular reference")]
    CircularReference { set_id: Uuid, path: Vec<Uuid> },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// One member reference inside a set, already narrowed to its single
/// non-null variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRef {
    Artifact(Uuid),
    Group(Uuid),
    NestedSet(Uuid),
}

pub type MemberMap = HashMap<Uuid, Vec<MemberRef>>;
pub type GroupMap = HashMap<Uuid, Vec<Uuid>>;

impl MemberRef {
    fn from_row(row: &DeploymentSetMember) -> Option<MemberRef> {
        match (row.artifact_uuid, row.group_id, row.member_set_id) {
            (Some(artifact), None, None) => Some(MemberRef::Artifact(artifact)),
            (None, Some(group), None) => Some(MemberRef::Group(group)),
            (None, None, Some(set)) => Some(MemberRef::NestedSet(set)),
            _ => {
                warn!("set member {} has an invalid reference shape", row.id);
                None
            }
        }
    }
}

/// Run the DFS over pre-built maps. Emission order is member position order;
/// the first occurrence of an artifact wins and duplicates are dropped.
pub fn resolve_dfs(
    root_set_id: Uuid,
    member_map: &MemberMap,
    group_map: &GroupMap,
    depth_limit: usize,
) -> Result<Vec<Uuid>, SetResolutionError> {
    let mut seen: HashSet<Uuid> = HashSet::new();
    let mut result: Vec<Uuid> = Vec::new();
    let mut path = vec![root_set_id];
    dfs(
        root_set_id,
        &mut path,
        member_map,
        group_map,
        depth_limit,
        &mut seen,
        &mut result,
    )?;
    Ok(result)
}

fn dfs(
    set_id: Uuid,
    path: &mut Vec<Uuid>,
    member_map: &MemberMap,
    group_map: &GroupMap,
    depth_limit: usize,
    seen: &mut HashSet<Uuid>,
    result: &mut Vec<Uuid>,
) -> Result<(), SetResolutionError> {
    if path.len() > depth_limit {
        return Err(SetResolutionError::DepthExceeded {
            set_id,
            path: path.clone(),
            depth_limit,
        });
    }

    let members = member_map.get(&set_id).map(Vec::as_slice).unwrap_or(&[]);
    for member in members {
        match member {
            MemberRef::Artifact(artifact) => {
                if seen.insert(*artifact) {
                    result.push(*artifact);
                }
            }
            MemberRef::Group(group) => {
                for artifact in group_map.get(group).map(Vec::as_slice).unwrap_or(&[]) {
                    if seen.insert(*artifact) {
                        result.push(*artifact);
                    }
                }
            }
            MemberRef::NestedSet(nested) => {
                path.push(*nested);
                dfs(*nested, path, member_map, group_map, depth_limit, seen, result)?;
                path.pop();
            }
        }
    }
    Ok(())
}

pub struct DeploymentSetResolver {
    db: DBService,
    depth_limit: usize,
}

impl DeploymentSetResolver {
    pub fn new(db: DBService) -> Self {
        Self {
            db,
            depth_limit: DEFAULT_DEPTH_LIMIT,
        }
    }

    pub fn with_depth_limit(db: DBService, depth_limit: usize) -> Self {
        Self { db, depth_limit }
    }

    /// Resolve a set into an ordered, deduplicated artifact UUID list.
    /// Unknown sets resolve to an empty list.
    pub async fn resolve(&self, set_id: Uuid) -> Result<Vec<Uuid>, SetResolutionError> {
        let member_map = self.build_member_map(set_id).await?;
        let group_map = self.build_group_map(&member_map).await?;
        resolve_dfs(set_id, &member_map, &group_map, self.depth_limit)
    }

    /// Collect members of every set reachable from the root, keyed by set.
    async fn build_member_map(&self, root_set_id: Uuid) -> Result<MemberMap, SetResolutionError> {
        let mut member_map: MemberMap = HashMap::new();
        let mut queue: VecDeque<Uuid> = VecDeque::from([root_set_id]);
        let mut visited: HashSet<Uuid> = HashSet::new();

        while let Some(set_id) = queue.pop_front() {
            if !visited.insert(set_id) {
                continue;
            }
            let rows = DeploymentSetMember::find_by_set(&self.db.pool, set_id).await?;
            let members: Vec<MemberRef> = rows.iter().filter_map(MemberRef::from_row).collect();
            for member in &members {
                if let MemberRef::NestedSet(nested) = member {
                    if !visited.contains(nested) {
                        queue.push_back(*nested);
                    }
                }
            }
            member_map.insert(set_id, members);
        }

        Ok(member_map)
    }

    async fn build_group_map(&self, member_map: &MemberMap) -> Result<GroupMap, SetResolutionError> {
        let mut group_ids: HashSet<Uuid> = HashSet::new();
        for members in member_map.values() {
            for member in members {
                if let MemberRef::Group(group) = member {
                    group_ids.insert(*group);
                }
            }
        }

        let mut group_map = GroupMap::new();
        for group_id in group_ids {
            let artifacts = GroupArtifact::members(&self.db.pool, group_id).await?;
            group_map.insert(group_id, artifacts);
        }
        Ok(group_map)
    }

    /// Add a nested-set member after proving the nesting cannot close a
    /// cycle: the parent must not be reachable from the proposed child.
    pub async fn add_member_with_cycle_check(
        &self,
        set_id: Uuid,
        member_set_id: Uuid,
        position: Option<i64>,
    ) -> Result<DeploymentSetMember, SetResolutionError> {
        let mut path = vec![set_id, member_set_id];
        if member_set_id == set_id || self.reaches(member_set_id, set_id, &mut path).await? {
            return Err(SetResolutionError::CircularReference { set_id, path });
        }

        let position = match position {
            Some(position) => position,
            None => DeploymentSetMember::next_position(&self.db.pool, set_id).await?,
        };
        Ok(DeploymentSetMember::add(
            &self.db.pool,
            set_id,
            None,
            None,
            Some(member_set_id),
            position,
        )
        .await?)
    }

    /// BFS over nested-set edges: can `from` reach `target`?
    async fn reaches(
        &self,
        from: Uuid,
        target: Uuid,
        path: &mut Vec<Uuid>,
    ) -> Result<bool, SetResolutionError> {
        let mut queue: VecDeque<Uuid> = VecDeque::from([from]);
        let mut visited: HashSet<Uuid> = HashSet::new();

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            for nested in DeploymentSetMember::nested_refs(&self.db.pool, current).await? {
                if nested == target {
                    path.push(nested);
                    return Ok(true);
                }
                queue.push_back(nested);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::models::deployment_set::{CreateDeploymentSet, DeploymentSet};
    use db::DBService;

    fn uuid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    #[test]
    fn nested_sets_resolve_in_order_with_dedup() {
        // root -> nested(B), nested(C); B = [u1, u2], C = [u2, u3]
        let (root, b, c) = (uuid(1), uuid(2), uuid(3));
        let (u1, u2, u3) = (uuid(11), uuid(12), uuid(13));

        let member_map: MemberMap = HashMap::from([
            (root, vec![MemberRef::NestedSet(b), MemberRef::NestedSet(c)]),
            (b, vec![MemberRef::Artifact(u1), MemberRef::Artifact(u2)]),
            (c, vec![MemberRef::Artifact(u2), MemberRef::Artifact(u3)]),
        ]);

        let result = resolve_dfs(root, &member_map, &GroupMap::new(), DEFAULT_DEPTH_LIMIT).unwrap();
        assert_eq!(result, vec![u1, u2, u3]);
    }

    #[test]
    fn groups_expand_in_position_order() {
        let root = uuid(1);
        let group = uuid(20);
        let (u1, u2, u3) = (uuid(11), uuid(12), uuid(13));

        let member_map: MemberMap = HashMap::from([(
            root,
            vec![MemberRef::Artifact(u3), MemberRef::Group(group)],
        )]);
        let group_map: GroupMap = HashMap::from([(group, vec![u1, u2, u3])]);

        let result = resolve_dfs(root, &member_map, &group_map, DEFAULT_DEPTH_LIMIT).unwrap();
        // u3 was emitted directly first, so the group contributes u1 and u2.
        assert_eq!(result, vec![u3, u1, u2]);
    }

    #[test]
    fn empty_set_resolves_to_empty_list() {
        let result = resolve_dfs(
            uuid(1),
            &MemberMap::new(),
            &GroupMap::new(),
            DEFAULT_DEPTH_LIMIT,
        )
        .unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn resolve_is_idempotent() {
        let (root, b) = (uuid(1), uuid(2));
        let member_map: MemberMap = HashMap::from([
            (root, vec![MemberRef::NestedSet(b), MemberRef::Artifact(uuid(11))]),
            (b, vec![MemberRef::Artifact(uuid(12))]),
        ]);
        let first = resolve_dfs(root, &member_map, &GroupMap::new(), 20).unwrap();
        let second = resolve_dfs(root, &member_map, &GroupMap::new(), 20).unwrap();
        assert_eq!(first, second);
    }

    fn chain_of(depth: usize) -> (Uuid, MemberMap) {
        // root(1) -> 2 -> 3 -> ... -> depth; leaf holds one artifact.
        let mut member_map = MemberMap::new();
        for i in 1..depth {
            member_map.insert(
                uuid(i as u128),
                vec![MemberRef::NestedSet(uuid((i + 1) as u128))],
            );
        }
        member_map.insert(uuid(depth as u128), vec![MemberRef::Artifact(uuid(999))]);
        (uuid(1), member_map)
    }

    #[test]
    fn depth_exactly_at_limit_succeeds() {
        let (root, member_map) = chain_of(20);
        let result = resolve_dfs(root, &member_map, &GroupMap::new(), 20).unwrap();
        assert_eq!(result, vec![uuid(999)]);
    }

    #[test]
    fn depth_one_past_limit_fails_with_path() {
        let (root, member_map) = chain_of(21);
        let err = resolve_dfs(root, &member_map, &GroupMap::new(), 20).unwrap_err();
        match err {
            SetResolutionError::DepthExceeded { path, depth_limit, .. } => {
                assert_eq!(depth_limit, 20);
                assert_eq!(path.len(), 21);
                assert_eq!(path[0], root);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn wide_hierarchy_resolves_completely() {
        // Five levels, each branching; over one hundred artifacts total.
        let mut member_map = MemberMap::new();
        let root = uuid(1);
        let mut next_set = 2u128;
        let mut next_artifact = 1000u128;
        let mut level = vec![root];
        for _ in 0..4 {
            let mut next_level = Vec::new();
            for set in &level {
                let mut members = Vec::new();
                for _ in 0..2 {
                    let child = uuid(next_set);
                    next_set += 1;
                    members.push(MemberRef::NestedSet(child));
                    next_level.push(child);
                }
                for _ in 0..5 {
                    members.push(MemberRef::Artifact(uuid(next_artifact)));
                    next_artifact += 1;
                }
                member_map.insert(*set, members);
            }
            level = next_level;
        }
        for set in &level {
            let mut members = Vec::new();
            for _ in 0..5 {
                members.push(MemberRef::Artifact(uuid(next_artifact)));
                next_artifact += 1;
            }
            member_map.insert(*set, members);
        }

        let result = resolve_dfs(root, &member_map, &GroupMap::new(), 20).unwrap();
        assert!(result.len() > 100);
        let unique: HashSet<_> = result.iter().collect();
        assert_eq!(unique.len(), result.len());
    }

    async fn make_set(db: &DBService, name: &str) -> DeploymentSet {
        DeploymentSet::create(
            &db.pool,
            &CreateDeploymentSet {
                name: name.to_string(),
                description: None,
                owner_id: "tester".to_string(),
                tags: None,
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn db_backed_resolution_follows_positions() {
        let db = DBService::new_in_memory().await.unwrap();
        let root = make_set(&db, "root").await;
        let nested = make_set(&db, "nested").await;

        let (a1, a2) = (Uuid::new_v4(), Uuid::new_v4());
        // Artifact members need real artifact rows for the FK.
        for (i, uuid) in [a1, a2].iter().enumerate() {
            sqlx::query(
                "INSERT INTO artifacts (uuid, id, type, name, created_at, updated_at)
                 VALUES (?, ?, 'skill', ?, datetime('now'), datetime('now'))",
            )
            .bind(uuid)
            .bind(format!("skill:s{i}"))
            .bind(format!("s{i}"))
            .execute(&db.pool)
            .await
            .unwrap();
        }

        DeploymentSetMember::add(&db.pool, root.id, None, None, Some(nested.id), 0)
            .await
            .unwrap();
        DeploymentSetMember::add(&db.pool, root.id, Some(a1), None, None, 1)
            .await
            .unwrap();
        DeploymentSetMember::add(&db.pool, nested.id, Some(a2), None, None, 0)
            .await
            .unwrap();

        let resolver = DeploymentSetResolver::new(db);
        let resolved = resolver.resolve(root.id).await.unwrap();
        // Nested set sits at position 0, so its artifact comes first.
        assert_eq!(resolved, vec![a2, a1]);
    }

    #[tokio::test]
    async fn cycle_is_rejected_before_any_write() {
        let db = DBService::new_in_memory().await.unwrap();
        let a = make_set(&db, "a").await;
        let b = make_set(&db, "b").await;

        let resolver = DeploymentSetResolver::new(db.clone());
        // a contains b.
        resolver
            .add_member_with_cycle_check(a.id, b.id, None)
            .await
            .unwrap();

        // b containing a would close the loop.
        let err = resolver
            .add_member_with_cycle_check(b.id, a.id, None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "This would create a circular reference");

        let members = DeploymentSetMember::find_by_set(&db.pool, b.id).await.unwrap();
        assert!(members.is_empty());
    }

    #[tokio::test]
    async fn self_nesting_is_rejected() {
        let db = DBService::new_in_memory().await.unwrap();
        let a = make_set(&db, "a").await;
        let resolver = DeploymentSetResolver::new(db);
        let err = resolver
            .add_member_with_cycle_check(a.id, a.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SetResolutionError::CircularReference { .. }));
    }
}
