use futures::future::{try_join_all, BoxFuture, FutureExt};

use crate::capability_log::{CapabilityKind, CapabilityLog, CapabilityWithPath};
use crate::crypto::{SecretKey, SymmetricKey};
use crate::cryptree::{
    Capability, DirectoryNode, EntryPoint, FileProperties, KeyedNode, Location, ParentLink,
    RetrievedCapability,
};
use crate::store::{CommitOutcome, Network};

use super::mutation::{commit_new, commit_update, CollisionPolicy};
use super::{name_is_empty_or_illegal, FileHandle, FsError};

/// Delete a slot, treating an already-empty slot as done
async fn delete_slot(
    network: &Network,
    signer: &SecretKey,
    location: &Location,
    node: &KeyedNode,
) -> Result<(), FsError> {
    let expected = node.content_hash()?;
    match network.remove(location, signer, expected).await? {
        CommitOutcome::Committed(_) | CommitOutcome::Conflict(None) => Ok(()),
        CommitOutcome::Conflict(Some(_)) => Err(FsError::ConcurrentModification {
            location: location.clone(),
        }),
    }
}

/// Delete a node and everything below it that we can sign for
fn delete_tree(
    network: Network,
    signer: SecretKey,
    capability: Capability,
    node: KeyedNode,
) -> BoxFuture<'static, Result<(), FsError>> {
    async move {
        let base_key = &capability.base_key;
        match &node {
            KeyedNode::Directory(dir) if node.is_readable(base_key) => {
                let children = dir.children(base_key)?;
                try_join_all(
                    children
                        .into_iter()
                        .filter(|child| child.location.writer == signer.public())
                        .map(|child| {
                            let network = network.clone();
                            let signer = signer.clone();
                            async move {
                                match network.get(&child.location).await? {
                                    Some(node) => delete_tree(network, signer, child, node).await,
                                    None => Ok(()),
                                }
                            }
                        }),
                )
                .await?;
            }
            KeyedNode::Directory(_) => {}
            KeyedNode::File(file) => {
                let data_key = file.data_key(base_key)?;
                let mut next = file.retriever().next(&data_key)?;
                while let Some(location) = next {
                    let Some(chunk) = network.get(&location).await? else {
                        break;
                    };
                    next = chunk.as_file()?.retriever().next(&data_key)?;
                    delete_slot(&network, &signer, &location, &chunk).await?;
                }
            }
        }
        delete_slot(&network, &signer, &capability.location, &node).await
    }
    .boxed()
}

/// Copy `source` into `target`, re-uploading files and recreating directories
fn copy_tree(
    source: FileHandle,
    target: FileHandle,
) -> BoxFuture<'static, Result<FileHandle, FsError>> {
    async move {
        target.ensure_fresh()?;
        target.require_directory()?;
        target.signer()?;
        if target.has_child(source.name()).await? {
            return Err(FsError::NameCollision {
                name: source.name().to_string(),
            });
        }

        if !source.is_directory() {
            let data = source.read_all().await?;
            let (target, _) = target
                .upload_new(source.properties().clone(), data.as_slice(), None)
                .await?;
            return Ok(target);
        }

        let target = target.mkdir(source.name()).await?;
        let mut copy = target
            .child(source.name())
            .await?
            .ok_or_else(|| FsError::NotFound(source.name().to_string()))?;
        for child in source.children().await? {
            copy = copy_tree(child, copy).await?;
        }
        Ok(target)
    }
    .boxed()
}

impl FileHandle {
    /// Create and commit an empty root directory owned and written by `owner`
    pub async fn create_root(
        owner: &SecretKey,
        owner_name: &str,
        network: &Network,
    ) -> Result<FileHandle, FsError> {
        if name_is_empty_or_illegal(owner_name) {
            return Err(FsError::IllegalName(owner_name.to_string()));
        }
        let location = Location::random(owner.public(), owner.public())?;
        let base_key = SymmetricKey::generate()?;
        let node: KeyedNode =
            DirectoryNode::create(&base_key, &FileProperties::directory(owner_name), None)?.into();
        commit_new(network, &location, owner, &node).await?;
        tracing::info!("created root for {}", owner_name);

        let capability = Capability::writable(location, owner.clone(), base_key);
        FileHandle::new(
            RetrievedCapability::new(capability, node),
            owner_name,
            Some(owner.clone()),
            network.clone(),
        )
    }

    /// This handle's capability as an entry point, with write access if we have it
    pub fn entry_point(&self) -> EntryPoint {
        EntryPoint::new(
            self.inherit_write(self.capability().clone()),
            self.owner_name(),
        )
    }

    /// Create an empty child directory. Returns the updated directory.
    pub async fn mkdir(self, name: &str) -> Result<FileHandle, FsError> {
        self.ensure_fresh()?;
        if name_is_empty_or_illegal(name) {
            return Err(FsError::IllegalName(name.to_string()));
        }
        self.require_directory()?;
        let signer = self.signer()?.clone();
        if self.has_child(name).await? {
            return Err(FsError::NameCollision {
                name: name.to_string(),
            });
        }

        let location = self.location().random_sibling()?;
        let base_key = SymmetricKey::generate()?;
        let parent_link = ParentLink {
            location: self.location().clone(),
            parent_key: self.parent_key(),
        };
        let node: KeyedNode =
            DirectoryNode::create(&base_key, &FileProperties::directory(name), Some(&parent_link))?
                .into();
        commit_new(self.network(), &location, &signer, &node).await?;

        let network = self.network().clone();
        let capability = Capability::new(location.clone(), base_key);
        match self
            .add_child_pointer(name, capability, CollisionPolicy::Fail)
            .await
        {
            Ok((parent, _)) => {
                tracing::debug!("created directory {}", name);
                Ok(parent)
            }
            Err(e) => {
                // the new directory never got linked
                delete_slot(&network, &signer, &location, &node).await?;
                Err(e)
            }
        }
    }

    /// Rename this child of `parent`.
    ///
    /// With `overwrite` an existing child called `new_name` is deleted
    /// first, otherwise it is a [`FsError::NameCollision`]. Returns the
    /// renamed handle and the (possibly updated) parent.
    pub async fn rename(
        self,
        new_name: &str,
        parent: FileHandle,
        overwrite: bool,
    ) -> Result<(FileHandle, FileHandle), FsError> {
        self.ensure_fresh()?;
        parent.ensure_fresh()?;
        if name_is_empty_or_illegal(new_name) {
            return Err(FsError::IllegalName(new_name.to_string()));
        }
        let signer = self.signer()?.clone();
        if new_name == self.name() {
            return Ok((self, parent));
        }

        let parent = match parent.child(new_name).await? {
            Some(_) if !overwrite => {
                return Err(FsError::NameCollision {
                    name: new_name.to_string(),
                })
            }
            Some(existing) => {
                tracing::debug!("{} replaces existing {}", self.name(), new_name);
                existing.remove(parent).await?
            }
            None => parent,
        };

        let props = self.properties().with_name(new_name);
        let updated = self.node().with_properties(self.base_key(), &props)?;
        commit_update(self.network(), self.location(), &signer, self.node(), &updated).await?;
        tracing::info!("renamed {} to {}", self.name(), new_name);

        self.supersede();
        let renamed = self.successor(self.capability().clone(), updated)?;
        Ok((renamed, parent))
    }

    /// Replace this node's properties. A new name must be free in `parent`.
    pub async fn set_properties(
        self,
        props: FileProperties,
        parent: &FileHandle,
    ) -> Result<FileHandle, FsError> {
        self.ensure_fresh()?;
        if name_is_empty_or_illegal(&props.name) {
            return Err(FsError::IllegalName(props.name));
        }
        let signer = self.signer()?.clone();
        if props.name != self.name() && parent.has_child(&props.name).await? {
            return Err(FsError::NameCollision { name: props.name });
        }

        let updated = self.node().with_properties(self.base_key(), &props)?;
        commit_update(self.network(), self.location(), &signer, self.node(), &updated).await?;
        self.supersede();
        self.successor(self.capability().clone(), updated)
    }

    /// Unlink this node from `parent` and delete it, with all its chunks
    /// and descendants. Returns the updated parent.
    pub async fn remove(self, parent: FileHandle) -> Result<FileHandle, FsError> {
        self.ensure_fresh()?;
        parent.ensure_fresh()?;
        let signer = self.signer()?.clone();

        let parent = parent.remove_child_pointer(self.location()).await?;
        delete_tree(
            self.network().clone(),
            signer,
            self.capability().clone(),
            self.node().clone(),
        )
        .await?;
        tracing::info!("removed {}", self.name());
        self.supersede();
        Ok(parent)
    }

    /// Copy this file or directory tree into `target`. Returns the
    /// updated target.
    pub async fn copy_to(&self, target: FileHandle) -> Result<FileHandle, FsError> {
        self.ensure_fresh()?;
        copy_tree(self.clone(), target).await
    }

    /// Link an existing node into this directory under its own name
    pub async fn add_link(self, link: &FileHandle) -> Result<FileHandle, FsError> {
        self.ensure_fresh()?;
        self.require_directory()?;
        let (dir, _) = self
            .add_child_pointer(
                link.name(),
                link.capability().read_only(),
                CollisionPolicy::Fail,
            )
            .await?;
        Ok(dir)
    }

    /// Record a capability for `file` in this shared directory's log.
    ///
    /// Only the owner of a writable shared directory can add to it.
    /// Returns the new number of records in the log.
    pub async fn add_sharing_link<L: CapabilityLog>(
        &self,
        file: &FileHandle,
        kind: CapabilityKind,
        log: &L,
    ) -> Result<u64, FsError> {
        self.ensure_fresh()?;
        file.ensure_fresh()?;
        self.require_directory()?;
        self.signer()?;
        let capability = match kind {
            CapabilityKind::ReadOnly => file.capability().read_only(),
            CapabilityKind::Edit => {
                let key = file.signer()?.clone();
                file.capability().with_write_key(Some(key))
            }
        };
        let path = file.path().await?;
        let count = log
            .append(
                kind,
                self.location(),
                CapabilityWithPath {
                    path: path.clone(),
                    capability,
                },
            )
            .await
            .map_err(FsError::capability_log)?;
        tracing::info!("shared {} ({:?}), {} records", path, kind, count);
        Ok(count)
    }

    /// Drop the pointer to `child` without deleting it
    pub async fn remove_child(self, child: &FileHandle) -> Result<FileHandle, FsError> {
        self.remove_child_pointer(child.location()).await
    }

    /// Drop pointers whose node is no longer in the store
    pub async fn clean_unreachable_children(self) -> Result<FileHandle, FsError> {
        self.ensure_fresh()?;
        let caps = self.capabilities_in(self.node())?;
        let nodes = try_join_all(caps.iter().map(|cap| self.network().get(&cap.location))).await?;
        let unreachable: Vec<Location> = caps
            .into_iter()
            .zip(nodes)
            .filter(|(_, node)| node.is_none())
            .map(|(cap, _)| cap.location)
            .collect();
        if unreachable.is_empty() {
            return Ok(self);
        }

        tracing::info!(
            "dropping {} unreachable children of {}",
            unreachable.len(),
            self.name()
        );
        self.modify_children(|dir, key| {
            dir.retain_children(key, |child| !unreachable.contains(&child.location))
        })
        .await
    }
}
