use std::collections::BTreeSet;

use futures::future::{try_join_all, BoxFuture, FutureExt};

use crate::crypto::{SecretKey, SymmetricKey};
use crate::cryptree::{Capability, CryptreeError, KeyedNode, ParentLink};
use crate::store::{CommitOutcome, Network};

use super::{FileHandle, FsError};

/// Re-key one node under a fresh base key and commit it.
///
/// Files are only marked dirty. Directories re-key every child first,
/// siblings in parallel, each child getting the new parent link.
fn rekey_node(
    network: Network,
    signer: SecretKey,
    capability: Capability,
    node: KeyedNode,
    parent_link: Option<ParentLink>,
) -> BoxFuture<'static, Result<(Capability, KeyedNode), FsError>> {
    async move {
        let old_base = capability.base_key.clone();
        let new_base = SymmetricKey::generate()?;

        let updated: KeyedNode = match &node {
            KeyedNode::File(file) => file
                .mark_dirty(&old_base, &new_base, parent_link.as_ref())?
                .into(),
            KeyedNode::Directory(dir) => {
                let new_parent_key = SymmetricKey::generate()?;
                let link = ParentLink {
                    location: capability.location.clone(),
                    parent_key: new_parent_key.clone(),
                };
                let children = dir.children(&old_base)?;
                let children = try_join_all(children.into_iter().map(|child| {
                    rekey_child(network.clone(), signer.clone(), child, link.clone())
                }))
                .await?;
                dir.rekey(
                    &old_base,
                    &new_base,
                    &new_parent_key,
                    &children,
                    parent_link.as_ref(),
                )?
                .into()
            }
        };

        let prior = node.content_hash()?;
        match network
            .commit(&capability.location, &signer, &updated, Some(prior))
            .await?
        {
            CommitOutcome::Committed(_) => Ok((capability.with_base_key(new_base), updated)),
            CommitOutcome::Conflict(_) => Err(FsError::ConcurrentModification {
                location: capability.location.clone(),
            }),
        }
    }
    .boxed()
}

async fn rekey_child(
    network: Network,
    signer: SecretKey,
    child: Capability,
    link: ParentLink,
) -> Result<Capability, FsError> {
    if child.location.writer != signer.public() {
        tracing::debug!("not re-keying {:?}, different writer", child.location);
        return Ok(child);
    }
    match network.get(&child.location).await? {
        Some(node) => {
            let (capability, _) = rekey_node(network, signer, child, node, Some(link)).await?;
            Ok(capability)
        }
        None => Ok(child),
    }
}

impl FileHandle {
    /// Rotate this node's keys so `readers_to_remove` lose access.
    ///
    /// Directories are re-keyed eagerly, all the way down. Files only get
    /// a new base key and are marked dirty; their content is re-encrypted
    /// by [`FileHandle::clean`]. The parent's pointer is updated either
    /// way. Returns the new handle and the updated parent.
    pub async fn make_dirty(
        self,
        parent: FileHandle,
        readers_to_remove: &BTreeSet<String>,
    ) -> Result<(FileHandle, FileHandle), FsError> {
        self.ensure_fresh()?;
        parent.ensure_fresh()?;
        let signer = self.signer()?.clone();
        if !self.is_readable() {
            return Err(FsError::NotReadable);
        }

        tracing::info!(
            "re-keying {} ({})",
            self.name(),
            if self.is_directory() { "eager" } else { "lazy" }
        );
        let parent_link = self.node().parent_link(self.base_key())?;
        let (capability, node) = rekey_node(
            self.network().clone(),
            signer,
            self.capability().clone(),
            self.node().clone(),
            parent_link,
        )
        .await?;

        let parent = parent
            .replace_child_pointer(self.location(), &capability)
            .await?;

        let readers = self
            .readers()
            .difference(readers_to_remove)
            .cloned()
            .collect();
        self.supersede();
        let updated = self.successor(capability, node)?.with_readers(readers);
        Ok((updated, parent))
    }

    /// Re-encrypt a dirty file's content under a fresh data key.
    ///
    /// The content is re-uploaded under a temporary name and renamed over
    /// the original. Cleaning a clean file does nothing.
    pub async fn clean(self, parent: FileHandle) -> Result<(FileHandle, FileHandle), FsError> {
        self.ensure_fresh()?;
        parent.ensure_fresh()?;
        if !self.is_dirty() {
            return Ok((self, parent));
        }
        if self.is_directory() {
            return Err(FsError::NotAFile);
        }

        let props = self.properties().clone();
        let data = self.read_all().await?;

        let mut tmp = [0u8; 16];
        getrandom::getrandom(&mut tmp).map_err(|e| CryptreeError::Random(e.to_string()))?;
        let tmp_name = format!("{}.tmp", hex::encode(tmp));
        tracing::debug!("cleaning {} via {}", props.name, tmp_name);

        let (parent, tmp_name) = parent
            .upload_new(
                props.with_name(tmp_name),
                data.as_slice(),
                Some(self.base_key().clone()),
            )
            .await?;
        let uploaded = parent
            .child(&tmp_name)
            .await?
            .ok_or_else(|| FsError::NotFound(tmp_name.clone()))?;

        self.supersede();
        uploaded.rename(&props.name, parent, true).await
    }
}
