//! Collection and partition load records

use crate::common::{Error, Result, UniqueId};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    NotLoaded,
    Loading,
    Loaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadType {
    /// Every partition of the collection, including ones created later
    LoadCollection,
    /// Only explicitly named partitions
    LoadPartition,
}

#[derive(Debug, Clone)]
pub struct Collection {
    pub collection_id: UniqueId,
    pub replica_number: u32,
    pub status: LoadStatus,
    pub load_type: LoadType,
    /// -1 when not loaded, else 0..=100
    pub load_percentage: i32,
    pub field_index_id: HashMap<i64, i64>,
    pub released_partitions: BTreeSet<UniqueId>,
    /// Fires `true` once the next target pulled by the last refresh is current
    pub refresh_notifier: Option<watch::Receiver<bool>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Collection {
    pub fn new(
        collection_id: UniqueId,
        replica_number: u32,
        load_type: LoadType,
        field_index_id: HashMap<i64, i64>,
    ) -> Self {
        let now = Utc::now();
        Self {
            collection_id,
            replica_number,
            status: LoadStatus::Loading,
            load_type,
            load_percentage: 0,
            field_index_id,
            released_partitions: BTreeSet::new(),
            refresh_notifier: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub partition_id: UniqueId,
    pub collection_id: UniqueId,
    pub replica_number: u32,
    pub status: LoadStatus,
    pub load_percentage: i32,
    pub created_at: DateTime<Utc>,
}

impl Partition {
    pub fn new(collection_id: UniqueId, partition_id: UniqueId, replica_number: u32) -> Self {
        Self {
            partition_id,
            collection_id,
            replica_number,
            status: LoadStatus::Loading,
            load_percentage: 0,
            created_at: Utc::now(),
        }
    }

    pub fn loaded(mut self) -> Self {
        self.status = LoadStatus::Loaded;
        self.load_percentage = 100;
        self
    }
}

#[derive(Default)]
struct Inner {
    collections: HashMap<UniqueId, Collection>,
    partitions: HashMap<UniqueId, Partition>,
}

impl Inner {
    fn partitions_of(&self, collection: UniqueId) -> impl Iterator<Item = &Partition> {
        self.partitions
            .values()
            .filter(move |p| p.collection_id == collection)
    }

    fn load_percentage(&self, collection: UniqueId) -> i32 {
        let Some(coll) = self.collections.get(&collection) else {
            return -1;
        };
        let (sum, count) = self
            .partitions_of(collection)
            .fold((0i64, 0i64), |(sum, count), p| {
                (sum + p.load_percentage as i64, count + 1)
            });
        if count == 0 {
            coll.load_percentage
        } else {
            (sum / count) as i32
        }
    }
}

/// CollectionManager keeps the load records of collections and their partitions.
pub struct CollectionManager {
    inner: RwLock<Inner>,
}

impl Default for CollectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectionManager {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn exist(&self, collection: UniqueId) -> bool {
        self.inner.read().collections.contains_key(&collection)
    }

    pub fn get_collection(&self, collection: UniqueId) -> Option<Collection> {
        self.inner.read().collections.get(&collection).cloned()
    }

    pub fn get_partition(&self, partition: UniqueId) -> Option<Partition> {
        self.inner.read().partitions.get(&partition).cloned()
    }

    /// Loaded partitions of a collection, ordered by id.
    pub fn get_partitions_by_collection(&self, collection: UniqueId) -> Vec<Partition> {
        let inner = self.inner.read();
        let mut partitions: Vec<Partition> = inner.partitions_of(collection).cloned().collect();
        partitions.sort_by_key(|p| p.partition_id);
        partitions
    }

    pub fn get_partition_ids(&self, collection: UniqueId) -> Vec<UniqueId> {
        self.get_partitions_by_collection(collection)
            .into_iter()
            .map(|p| p.partition_id)
            .collect()
    }

    /// All collection records, ordered by id.
    pub fn get_all_collections(&self) -> Vec<Collection> {
        let mut collections: Vec<Collection> =
            self.inner.read().collections.values().cloned().collect();
        collections.sort_by_key(|c| c.collection_id);
        collections
    }

    pub fn get_load_type(&self, collection: UniqueId) -> Option<LoadType> {
        self.inner
            .read()
            .collections
            .get(&collection)
            .map(|c| c.load_type)
    }

    /// Average over loaded partitions, the collection's own value when it has
    /// none, -1 when the collection is unknown.
    pub fn calculate_load_percentage(&self, collection: UniqueId) -> i32 {
        self.inner.read().load_percentage(collection)
    }

    pub fn calculate_load_status(&self, collection: UniqueId) -> LoadStatus {
        self.inner
            .read()
            .collections
            .get(&collection)
            .map(|c| c.status)
            .unwrap_or(LoadStatus::NotLoaded)
    }

    pub fn get_partition_load_percentage(&self, partition: UniqueId) -> i32 {
        self.inner
            .read()
            .partitions
            .get(&partition)
            .map(|p| p.load_percentage)
            .unwrap_or(-1)
    }

    /// Insert or replace a collection together with some of its partitions.
    pub fn put_collection(&self, collection: Collection, partitions: Vec<Partition>) {
        let mut inner = self.inner.write();
        for partition in partitions {
            inner.partitions.insert(partition.partition_id, partition);
        }
        inner
            .collections
            .insert(collection.collection_id, collection);
    }

    /// Add partitions to an existing collection record. A partition still
    /// loading puts the collection back to Loading.
    pub fn put_partitions(&self, partitions: Vec<Partition>) -> Result<()> {
        let mut inner = self.inner.write();
        for partition in partitions {
            let Some(coll) = inner.collections.get_mut(&partition.collection_id) else {
                return Err(Error::CollectionNotLoaded(
                    partition.collection_id,
                    String::new(),
                ));
            };
            coll.released_partitions.remove(&partition.partition_id);
            if partition.status != LoadStatus::Loaded {
                coll.status = LoadStatus::Loading;
            }
            coll.updated_at = Utc::now();
            inner.partitions.insert(partition.partition_id, partition);
        }
        Ok(())
    }

    pub fn set_load_type(&self, collection: UniqueId, load_type: LoadType) {
        if let Some(coll) = self.inner.write().collections.get_mut(&collection) {
            coll.load_type = load_type;
        }
    }

    /// Record reconciliation progress of a partition.
    ///
    /// A partition that reached Loaded keeps 100; the collection turns Loaded
    /// once the aggregate reaches 100. Returns the collection percentage.
    pub fn update_load_percentage(&self, partition: UniqueId, percentage: i32) -> Result<i32> {
        let mut inner = self.inner.write();
        let Some(part) = inner.partitions.get_mut(&partition) else {
            return Err(Error::PartitionNotLoaded(vec![partition]));
        };
        if part.status != LoadStatus::Loaded {
            part.load_percentage = percentage.clamp(0, 100);
            if part.load_percentage == 100 {
                part.status = LoadStatus::Loaded;
            }
        }
        let collection = part.collection_id;

        let aggregate = inner.load_percentage(collection);
        let Some(coll) = inner.collections.get_mut(&collection) else {
            return Err(Error::CollectionNotLoaded(collection, String::new()));
        };
        if coll.status != LoadStatus::Loaded {
            coll.load_percentage = aggregate;
            if aggregate == 100 {
                coll.status = LoadStatus::Loaded;
                tracing::info!(collection_id = collection, "collection fully loaded");
            }
        }
        coll.updated_at = Utc::now();
        Ok(coll.load_percentage)
    }

    pub fn set_refresh_notifier(&self, collection: UniqueId, notifier: watch::Receiver<bool>) {
        if let Some(coll) = self.inner.write().collections.get_mut(&collection) {
            coll.refresh_notifier = Some(notifier);
        }
    }

    /// Whether the last refresh of the collection completed.
    pub fn is_refreshed(&self, collection: UniqueId) -> bool {
        let inner = self.inner.read();
        let Some(coll) = inner.collections.get(&collection) else {
            return false;
        };
        match &coll.refresh_notifier {
            None => true,
            Some(rx) => *rx.borrow() || rx.has_changed().is_err(),
        }
    }

    /// Remove a collection and all its partitions.
    pub fn remove_collection(&self, collection: UniqueId) -> bool {
        let mut inner = self.inner.write();
        inner.partitions.retain(|_, p| p.collection_id != collection);
        inner.collections.remove(&collection).is_some()
    }

    /// Remove some partitions; a LoadCollection record remembers them as released.
    pub fn remove_partitions(&self, collection: UniqueId, partitions: &[UniqueId]) {
        let mut inner = self.inner.write();
        for id in partitions {
            inner.partitions.remove(id);
        }
        if let Some(coll) = inner.collections.get_mut(&collection) {
            if coll.load_type == LoadType::LoadCollection {
                coll.released_partitions.extend(partitions.iter().copied());
            }
            coll.updated_at = Utc::now();
        }
    }
}
