use crate::codec::NodeHash;
use crate::crypto::{SecretKey, SymmetricKey};
use crate::cryptree::{Capability, CryptreeError, DirectoryNode, KeyedNode, Location};
use crate::store::{CommitOutcome, Network};

use super::{FileHandle, FsError};

/// What to do when an added child's name is already taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionPolicy {
    /// Rename the new child to the first free `name[n]`
    RenameNew,
    /// Give up with [`FsError::NameCollision`]
    Fail,
}

/// Commit a node into an empty slot
pub(crate) async fn commit_new(
    network: &Network,
    location: &Location,
    signer: &SecretKey,
    node: &KeyedNode,
) -> Result<(), FsError> {
    match network.commit(location, signer, node, None).await? {
        CommitOutcome::Committed(_) => Ok(()),
        CommitOutcome::Conflict(_) => Err(FsError::ConcurrentModification {
            location: location.clone(),
        }),
    }
}

/// Replace `prior` with `updated`, failing if someone else changed it
pub(crate) async fn commit_update(
    network: &Network,
    location: &Location,
    signer: &SecretKey,
    prior: &KeyedNode,
    updated: &KeyedNode,
) -> Result<(), FsError> {
    let expected = prior.content_hash()?;
    match network.commit(location, signer, updated, Some(expected)).await? {
        CommitOutcome::Committed(_) => Ok(()),
        CommitOutcome::Conflict(_) => Err(FsError::ConcurrentModification {
            location: location.clone(),
        }),
    }
}

fn with_suffix(name: &str, n: usize) -> String {
    match name.rfind('.') {
        Some(dot) => format!("{}[{}]{}", &name[..dot], n, &name[dot..]),
        None => format!("{}[{}]", name, n),
    }
}

/// First `name[n]` (suffix before the last extension) that is not taken
pub fn next_safe_replacement_name(
    name: &str,
    taken: impl Fn(&str) -> bool,
    max_suffixes: usize,
) -> Result<String, FsError> {
    (1..=max_suffixes)
        .map(|n| with_suffix(name, n))
        .find(|candidate| !taken(candidate))
        .ok_or_else(|| FsError::TooManyCollisions {
            name: name.to_string(),
        })
}

impl FileHandle {
    /// Link `child` into this directory under `name`.
    ///
    /// Commits with compare-and-swap. On conflict the directory is
    /// refreshed from the store's copy: if the name is now taken the
    /// policy decides, otherwise the add is retried within the retry
    /// budget. Returns the updated directory and the name used.
    pub(crate) async fn add_child_pointer(
        self,
        name: &str,
        child: Capability,
        policy: CollisionPolicy,
    ) -> Result<(FileHandle, String), FsError> {
        self.ensure_fresh()?;
        let signer = self.signer()?.clone();
        let base_key = self.base_key().clone();
        let location = self.location().clone();
        let retries = self.network().config().cas_retries;
        let max_suffixes = self.network().config().max_collision_suffixes;

        let mut node = self.node().clone();
        let original = name;
        let mut name = name.to_string();
        let mut names = self.names_in(&node).await?;
        let mut conflicts = 0;
        loop {
            if names.contains(&name) {
                match policy {
                    CollisionPolicy::Fail => return Err(FsError::NameCollision { name }),
                    CollisionPolicy::RenameNew => {
                        let renamed = next_safe_replacement_name(
                            original,
                            |n| names.contains(n),
                            max_suffixes,
                        )?;
                        tracing::info!("{} already exists, renaming new file to {}", name, renamed);
                        self.rename_unlinked(&child, &signer, &renamed).await?;
                        name = renamed;
                    }
                }
            }

            let (updated, prior) = node.as_directory()?.add_child(&base_key, &child)?;
            match self
                .network()
                .commit(&location, &signer, &updated, Some(prior))
                .await?
            {
                CommitOutcome::Committed(_) => {
                    self.supersede();
                    let parent = self.successor(self.capability().clone(), updated)?;
                    return Ok((parent, name));
                }
                CommitOutcome::Conflict(current) => {
                    node = current.ok_or_else(|| {
                        FsError::NotFound(format!("directory at {:?}", location))
                    })?;
                    names = self.names_in(&node).await?;
                    if !names.contains(&name) {
                        conflicts += 1;
                        if conflicts > retries {
                            tracing::warn!(
                                "giving up adding {} to {:?} after {} conflicts",
                                name,
                                location,
                                conflicts
                            );
                            return Err(FsError::ConcurrentModification { location });
                        }
                    }
                    tracing::debug!("conflict adding {}, retrying", name);
                }
            }
        }
    }

    /// Rename a freshly uploaded child that is not linked anywhere yet
    async fn rename_unlinked(
        &self,
        child: &Capability,
        signer: &SecretKey,
        new_name: &str,
    ) -> Result<(), FsError> {
        let node = self
            .network()
            .get(&child.location)
            .await?
            .ok_or_else(|| FsError::NotFound(format!("{:?}", child.location)))?;
        let props = node.properties(&child.base_key)?.with_name(new_name);
        let updated = node.with_properties(&child.base_key, &props)?;
        commit_update(self.network(), &child.location, signer, &node, &updated).await
    }

    /// Apply `change` to this directory's node with compare-and-swap,
    /// re-applying it to the store's copy on conflict.
    pub(crate) async fn modify_children<F>(self, change: F) -> Result<FileHandle, FsError>
    where
        F: Fn(&DirectoryNode, &SymmetricKey) -> Result<(KeyedNode, NodeHash), CryptreeError>
            + Send
            + Sync,
    {
        self.ensure_fresh()?;
        let signer = self.signer()?.clone();
        let base_key = self.base_key().clone();
        let location = self.location().clone();
        let retries = self.network().config().cas_retries;

        let mut node = self.node().clone();
        let mut conflicts = 0;
        loop {
            let dir = node.as_directory().map_err(|_| FsError::NotADirectory)?;
            let (updated, prior) = change(dir, &base_key)?;
            match self
                .network()
                .commit(&location, &signer, &updated, Some(prior))
                .await?
            {
                CommitOutcome::Committed(_) => {
                    self.supersede();
                    return self.successor(self.capability().clone(), updated);
                }
                CommitOutcome::Conflict(current) => {
                    conflicts += 1;
                    if conflicts > retries {
                        return Err(FsError::ConcurrentModification { location });
                    }
                    node = current.ok_or_else(|| {
                        FsError::NotFound(format!("directory at {:?}", location))
                    })?;
                    tracing::debug!("conflict updating {:?}, retrying", location);
                }
            }
        }
    }

    pub(crate) async fn remove_child_pointer(
        self,
        child: &Location,
    ) -> Result<FileHandle, FsError> {
        self.modify_children(|dir, key| dir.remove_child(key, child))
            .await
    }

    pub(crate) async fn replace_child_pointer(
        self,
        child: &Location,
        replacement: &Capability,
    ) -> Result<FileHandle, FsError> {
        self.modify_children(|dir, key| dir.replace_child(key, child, replacement))
            .await
    }
}
