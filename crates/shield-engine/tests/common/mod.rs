#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use shield_auth_simple::SimpleAccessProvider;
use shield_core::models::{
    Actor, BannedRecord, Candidate, GroupId, Member, MemberPage, Reviewer, UserId,
};
use shield_core::records::{EntitySet, RecordSet, Records};
use shield_core::traits::{GroupDirectory, Notifier, RecordStore};
use shield_engine::{ScanMode, ScanPolicy, ShieldService};
use shield_store_json::JsonFileStore;
use tempfile::TempDir;

/// In-memory directory. Membership pages hold two members each.
#[derive(Default)]
pub struct FakeDirectory {
    groups: Mutex<HashMap<GroupId, Vec<Member>>>,
    names: Mutex<HashMap<GroupId, String>>,
    failing: Mutex<HashSet<GroupId>>,
    failing_users: Mutex<HashSet<UserId>>,
}

const PAGE: usize = 2;

pub fn member(id: u64) -> Member {
    Member {
        user_id: UserId(id),
        username: format!("user{id}"),
    }
}

impl FakeDirectory {
    pub fn set_group(&self, group: u64, name: &str, members: &[u64]) {
        self.groups
            .lock()
            .unwrap()
            .insert(GroupId(group), members.iter().copied().map(member).collect());
        self.names
            .lock()
            .unwrap()
            .insert(GroupId(group), name.to_string());
    }

    pub fn fail_group(&self, group: u64, failing: bool) {
        let mut set = self.failing.lock().unwrap();
        if failing {
            set.insert(GroupId(group));
        } else {
            set.remove(&GroupId(group));
        }
    }

    pub fn fail_user_lookup(&self, user: u64) {
        self.failing_users.lock().unwrap().insert(UserId(user));
    }
}

#[async_trait]
impl GroupDirectory for FakeDirectory {
    async fn group_name(&self, group_id: GroupId) -> anyhow::Result<String> {
        self.names
            .lock()
            .unwrap()
            .get(&group_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no such group"))
    }

    async fn members_page(
        &self,
        group_id: GroupId,
        cursor: Option<String>,
    ) -> anyhow::Result<MemberPage> {
        if self.failing.lock().unwrap().contains(&group_id) {
            anyhow::bail!("directory unavailable for group {group_id}");
        }
        let members = self
            .groups
            .lock()
            .unwrap()
            .get(&group_id)
            .cloned()
            .unwrap_or_default();
        let offset: usize = cursor.map(|c| c.parse().unwrap()).unwrap_or(0);
        let end = (offset + PAGE).min(members.len());
        Ok(MemberPage {
            members: members[offset.min(end)..end].to_vec(),
            next_cursor: (end < members.len()).then(|| end.to_string()),
        })
    }

    async fn user_groups(&self, user_id: UserId) -> anyhow::Result<Vec<GroupId>> {
        if self.failing_users.lock().unwrap().contains(&user_id) {
            anyhow::bail!("roles endpoint down");
        }
        let mut groups: Vec<GroupId> = self
            .groups
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, members)| members.iter().any(|m| m.user_id == user_id))
            .map(|(id, _)| *id)
            .collect();
        groups.sort();
        Ok(groups)
    }
}

/// File store whose next write to a chosen set fails once.
pub struct FlakyStore {
    inner: JsonFileStore,
    fail_next: Mutex<HashSet<EntitySet>>,
}

impl FlakyStore {
    pub fn fail_next_write(&self, set: EntitySet) {
        self.fail_next.lock().unwrap().insert(set);
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn read(&self, set: EntitySet) -> Option<Vec<u8>> {
        self.inner.read(set).await
    }

    async fn write(&self, set: EntitySet, contents: Vec<u8>) -> anyhow::Result<()> {
        if self.fail_next.lock().unwrap().remove(&set) {
            anyhow::bail!("disk full while writing {}", set.name());
        }
        self.inner.write(set, contents).await
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: String) {
        self.messages.lock().unwrap().push(message);
    }
}

pub struct Harness {
    pub service: ShieldService,
    pub directory: Arc<FakeDirectory>,
    pub notifier: Arc<RecordingNotifier>,
    pub records: Arc<Records>,
    pub store: Arc<FlakyStore>,
    pub dir: TempDir,
}

pub fn harness() -> Harness {
    harness_with(ScanMode::Inline)
}

pub fn harness_with(mode: ScanMode) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FlakyStore {
        inner: JsonFileStore::new(dir.path()),
        fail_next: Mutex::new(HashSet::new()),
    });
    let records = Arc::new(Records::new(store.clone()));
    let directory = Arc::new(FakeDirectory::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let service = ShieldService::new(
        Arc::clone(&records),
        directory.clone(),
        notifier.clone(),
        Arc::new(SimpleAccessProvider::new()),
        ScanPolicy {
            mode,
            timeout: Duration::from_secs(5),
            concurrency: 2,
        },
    );
    Harness {
        service,
        directory,
        notifier,
        records,
        store,
        dir,
    }
}

pub fn reviewer() -> Reviewer {
    Reviewer {
        name: "ana".into(),
        passcode: "ana-secret".into(),
    }
}

impl Harness {
    /// Writes bans directly, as if issued before this test started.
    pub async fn seed_banned(&self, ids: &[u64]) {
        let locked = self.records.lock(&[EntitySet::Banned]).await;
        let mut banned: RecordSet<BannedRecord> =
            locked.load_keyed(EntitySet::Banned).await.unwrap();
        for id in ids {
            let candidate = Candidate {
                user_id: UserId(*id),
                username: format!("user{id}"),
                group_id: GroupId(999),
                group_name: "Elsewhere".into(),
                submitted_at: Utc::now(),
                reviewed: false,
            };
            banned.insert(BannedRecord::from_candidate(
                candidate,
                Actor::Reviewer("seed".into()),
                "seeded".into(),
            ));
        }
        locked.save_keyed(EntitySet::Banned, &banned).await.unwrap();
    }

    pub async fn banned_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .service
            .list_banned()
            .await
            .iter()
            .map(|r| r.user_id().0)
            .collect();
        ids.sort();
        ids
    }

    pub async fn pending_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .service
            .list_pending()
            .await
            .iter()
            .map(|c| c.user_id.0)
            .collect();
        ids.sort();
        ids
    }
}
