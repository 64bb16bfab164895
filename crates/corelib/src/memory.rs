//! Minimal in-memory local node.
//!
//! `MemoryNode` keeps its references and entries in memory and answers the
//! `Node` contract from a one-hop view of the ring: it knows its
//! predecessor and successor list but has no routing table. Ring maintenance
//! (stabilization, finger tables) is not its job; callers wire successors in
//! with [`MemoryNode::set_successors`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::debug;

use crate::entry::Entry;
use crate::error::{ComResult, CommunicationError};
use crate::id::Id;
use crate::node::{Node, NodeRef, RefsAndEntries};
use crate::url::Url;

#[derive(Debug)]
pub struct MemoryNode {
    id: Id,
    url: Url,
    me: Weak<MemoryNode>,
    predecessor: RwLock<Option<NodeRef>>,
    successors: RwLock<Vec<NodeRef>>,
    entries: RwLock<HashMap<Id, HashSet<Entry>>>,
    replicas: RwLock<HashMap<Id, HashSet<Entry>>>,
}

fn ring_error(err: crate::error::Error) -> CommunicationError {
    CommunicationError::with_source("identifier arithmetic failed", err)
}

impl MemoryNode {
    pub fn new(id: Id, url: Url) -> Arc<Self> {
        Arc::new_cyclic(|me| MemoryNode {
            id,
            url,
            me: me.clone(),
            predecessor: RwLock::new(None),
            successors: RwLock::new(Vec::new()),
            entries: RwLock::new(HashMap::new()),
            replicas: RwLock::new(HashMap::new()),
        })
    }

    /// Handle to this node itself.
    pub fn node_ref(&self) -> ComResult<NodeRef> {
        self.me
            .upgrade()
            .map(NodeRef::from)
            .ok_or_else(|| CommunicationError::new(format!("node {} has been dropped", self.url)))
    }

    pub fn set_successors(&self, successors: Vec<NodeRef>) {
        *self.successors.write() = successors;
    }

    pub fn predecessor(&self) -> Option<NodeRef> {
        self.predecessor.read().clone()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.read().values().map(HashSet::len).sum()
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.read().values().map(HashSet::len).sum()
    }

    fn references(&self) -> Vec<NodeRef> {
        let mut refs: Vec<NodeRef> = self.predecessor.read().iter().cloned().collect();
        refs.extend(self.successors.read().iter().cloned());
        refs
    }
}

impl Node for MemoryNode {
    fn id(&self) -> &Id {
        &self.id
    }

    fn url(&self) -> &Url {
        &self.url
    }

    fn find_successor(&self, key: &Id) -> ComResult<NodeRef> {
        let successor = self.successors.read().first().cloned();
        match successor {
            Some(successor)
                if key == successor.id()
                    || key.is_in_interval(&self.id, successor.id()).map_err(ring_error)? =>
            {
                Ok(successor)
            }
            _ => self.node_ref(),
        }
    }

    fn notify(&self, potential_predecessor: &NodeRef) -> ComResult<Vec<NodeRef>> {
        {
            let mut predecessor = self.predecessor.write();
            let accept = match predecessor.as_ref() {
                None => true,
                Some(current) => potential_predecessor
                    .id()
                    .is_in_interval(current.id(), &self.id)
                    .map_err(ring_error)?,
            };
            if accept && potential_predecessor.id() != &self.id {
                debug!(
                    url = %self.url,
                    predecessor = %potential_predecessor.url(),
                    "accepted new predecessor"
                );
                *predecessor = Some(potential_predecessor.clone());
            }
        }
        Ok(self.references())
    }

    fn notify_and_copy_entries(
        &self,
        potential_predecessor: &NodeRef,
    ) -> ComResult<RefsAndEntries> {
        let refs = self.notify(potential_predecessor)?;
        let mut handed_over = HashSet::new();
        for (id, entries) in self.entries.read().iter() {
            let ours = id == &self.id
                || id
                    .is_in_interval(potential_predecessor.id(), &self.id)
                    .map_err(ring_error)?;
            if !ours {
                handed_over.extend(entries.iter().cloned());
            }
        }
        Ok(RefsAndEntries::new(refs, handed_over))
    }

    fn ping(&self) -> ComResult<()> {
        Ok(())
    }

    fn insert_entry(&self, entry: Entry) -> ComResult<()> {
        self.entries
            .write()
            .entry(entry.id().clone())
            .or_default()
            .insert(entry);
        Ok(())
    }

    fn insert_replicas(&self, entries: HashSet<Entry>) -> ComResult<()> {
        let mut replicas = self.replicas.write();
        for entry in entries {
            replicas.entry(entry.id().clone()).or_default().insert(entry);
        }
        Ok(())
    }

    fn remove_entry(&self, entry: Entry) -> ComResult<()> {
        let mut entries = self.entries.write();
        if let Some(set) = entries.get_mut(entry.id()) {
            set.remove(&entry);
            if set.is_empty() {
                entries.remove(entry.id());
            }
        }
        Ok(())
    }

    fn remove_replicas(&self, sender: &Id, to_remove: HashSet<Entry>) -> ComResult<()> {
        let mut replicas = self.replicas.write();
        if to_remove.is_empty() {
            let mut below = Vec::new();
            for id in replicas.keys() {
                if id.compare(sender).map_err(ring_error)?.is_lt() {
                    below.push(id.clone());
                }
            }
            for id in below {
                replicas.remove(&id);
            }
            return Ok(());
        }
        for entry in to_remove {
            if let Some(set) = replicas.get_mut(entry.id()) {
                set.remove(&entry);
                if set.is_empty() {
                    replicas.remove(entry.id());
                }
            }
        }
        Ok(())
    }

    fn retrieve_entries(&self, id: &Id) -> ComResult<HashSet<Entry>> {
        let mut found = self.entries.read().get(id).cloned().unwrap_or_default();
        if let Some(replicas) = self.replicas.read().get(id) {
            found.extend(replicas.iter().cloned());
        }
        Ok(found)
    }

    fn leaves_network(&self, predecessor: &NodeRef) -> ComResult<()> {
        *self.predecessor.write() = Some(predecessor.clone());
        Ok(())
    }

    fn disconnect(&self) {
        debug!(url = %self.url, "memory node disconnected");
    }
}
