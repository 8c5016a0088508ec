use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::crypto::{SecretKey, SymmetricKey};
use crate::cryptree::{
    Capability, FileHeader, FileNode, FileProperties, KeyedNode, Location, ParentLink, Retriever,
};
use crate::store::{CommitOutcome, Network};

use super::mutation::{commit_new, CollisionPolicy};
use super::{name_is_empty_or_illegal, FileHandle, FsError};

/// Decrypted file content, chunk by chunk
pub type ByteStream = BoxStream<'static, Result<Bytes, FsError>>;

/// Split `len` bytes from `reader` into a chain of chunks starting at `first`
#[allow(clippy::too_many_arguments)]
async fn write_chunks<R>(
    network: &Network,
    signer: &SecretKey,
    first: &Location,
    header: &FileHeader,
    data_key: &SymmetricKey,
    chunk_size: u64,
    mut reader: R,
    len: u64,
) -> Result<(), FsError>
where
    R: AsyncRead + Unpin + Send,
{
    let mut location = first.clone();
    let mut remaining = len;
    loop {
        let this_len = remaining.min(chunk_size);
        let mut buf = vec![0u8; this_len as usize];
        reader.read_exact(&mut buf).await?;
        remaining -= this_len;

        let next = if remaining > 0 {
            Some(location.random_sibling()?)
        } else {
            None
        };
        let retriever = Retriever::encrypt(data_key, chunk_size, &buf, next.as_ref())?;
        let node: KeyedNode = FileNode::new(header.clone(), retriever).into();
        commit_new(network, &location, signer, &node).await?;

        match next {
            Some(next) => location = next,
            None => return Ok(()),
        }
    }
}

struct ReadState {
    network: Network,
    data_key: SymmetricKey,
    /// next chunk to read, with its node if we already have it
    next: Option<(Location, Option<KeyedNode>)>,
    last: Location,
    remaining: u64,
    offset: u64,
}

impl FileHandle {
    /// Upload `end - start` bytes from `reader` as the child `name`.
    ///
    /// A new file must start at offset 0. With `overwrite`, an existing
    /// file is written in place over `[start, end)`, after cleaning it if
    /// it is dirty. A new file whose name is taken by the time it is
    /// committed is renamed to `name[1]`, `name[2]`, ... Returns the
    /// updated directory.
    pub async fn upload_file<R>(
        self,
        name: &str,
        reader: R,
        start: u64,
        end: u64,
        overwrite: bool,
    ) -> Result<FileHandle, FsError>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.ensure_fresh()?;
        if name_is_empty_or_illegal(name) {
            return Err(FsError::IllegalName(name.to_string()));
        }
        if end < start {
            return Err(FsError::InvalidRange { start, end });
        }
        self.require_directory()?;
        self.signer()?;

        match self.child(name).await? {
            Some(_) if !overwrite => Err(FsError::NameCollision {
                name: name.to_string(),
            }),
            Some(existing) if existing.is_directory() => Err(FsError::NotAFile),
            Some(existing) => {
                let (existing, parent) = if existing.is_dirty() {
                    tracing::debug!("cleaning dirty file {} before overwriting it", name);
                    existing.clean(self).await?
                } else {
                    (existing, self)
                };
                existing.overwrite_range(reader, start, end).await?;
                Ok(parent)
            }
            None if start > 0 => Err(FsError::NotImplemented(
                "uploading a new file at a non-zero offset",
            )),
            None => {
                let (parent, _) = self
                    .upload_new(FileProperties::file(name, end), reader, None)
                    .await?;
                Ok(parent)
            }
        }
    }

    /// Upload a new child file of `props.size` bytes and link it in.
    ///
    /// Returns the updated directory and the name the file ended up with.
    pub(crate) async fn upload_new<R>(
        self,
        props: FileProperties,
        reader: R,
        base_key: Option<SymmetricKey>,
    ) -> Result<(FileHandle, String), FsError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let signer = self.signer()?.clone();
        let chunk_size = self.network().config().chunk_size as u64;
        let location = self.location().random_sibling()?;
        let base_key = match base_key {
            Some(key) => key,
            None => SymmetricKey::generate()?,
        };
        let data_key = SymmetricKey::generate()?;
        let parent_link = ParentLink {
            location: self.location().clone(),
            parent_key: self.parent_key(),
        };
        let header = FileHeader::create(&base_key, &data_key, &props, Some(&parent_link))?;

        tracing::info!(
            "uploading {} ({} bytes, {} byte chunks)",
            props.name,
            props.size,
            chunk_size
        );
        write_chunks(
            self.network(),
            &signer,
            &location,
            &header,
            &data_key,
            chunk_size,
            reader,
            props.size,
        )
        .await?;

        let capability = Capability::new(location, base_key);
        self.add_child_pointer(&props.name, capability, CollisionPolicy::RenameNew)
            .await
    }

    /// Stream the file's content, chunk by chunk
    pub fn open_for_read(&self) -> Result<ByteStream, FsError> {
        self.ensure_fresh()?;
        let file = self.node().as_file().map_err(|_| FsError::NotAFile)?;
        let data_key = file
            .data_key(self.base_key())
            .map_err(|_| FsError::NotReadable)?;

        let state = ReadState {
            network: self.network().clone(),
            data_key,
            next: Some((self.location().clone(), Some(self.node().clone()))),
            last: self.location().clone(),
            remaining: self.size(),
            offset: 0,
        };

        let stream = stream::try_unfold(state, |mut st| async move {
            if st.remaining == 0 {
                return Ok(None);
            }
            let Some((location, cached)) = st.next.take() else {
                return Err(FsError::MissingChunk {
                    location: st.last.clone(),
                    offset: st.offset,
                });
            };
            let node = match cached {
                Some(node) => node,
                None => st.network.get(&location).await?.ok_or_else(|| {
                    FsError::MissingChunk {
                        location: location.clone(),
                        offset: st.offset,
                    }
                })?,
            };

            let retriever = node.as_file()?.retriever();
            let mut plain = retriever.decrypt(&st.data_key)?;
            let take = (plain.len() as u64).min(st.remaining);
            plain.truncate(take as usize);

            st.remaining -= take;
            st.offset += take;
            st.next = retriever.next(&st.data_key)?.map(|next| (next, None));
            st.last = location;
            Ok(Some((Bytes::from(plain), st)))
        });
        Ok(stream.boxed())
    }

    /// The whole file in memory
    pub async fn read_all(&self) -> Result<Vec<u8>, FsError> {
        let mut stream = self.open_for_read()?;
        let mut out = Vec::with_capacity(self.size() as usize);
        while let Some(chunk) = stream.try_next().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    /// Overwrite `[start, end)` with bytes from `reader`.
    ///
    /// Only the chunks the range touches are re-encrypted. The file grows
    /// to `end` if it was shorter, and the recorded size never shrinks.
    pub async fn overwrite_range<R>(
        self,
        mut reader: R,
        start: u64,
        end: u64,
    ) -> Result<FileHandle, FsError>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.ensure_fresh()?;
        if end < start {
            return Err(FsError::InvalidRange { start, end });
        }
        let signer = self.signer()?.clone();
        let first = self.node().as_file().map_err(|_| FsError::NotAFile)?.clone();
        let base_key = self.base_key().clone();
        let data_key = first.data_key(&base_key)?;
        let size = self.size();
        if start > size {
            return Err(FsError::NotImplemented("writing past the end of a file"));
        }
        if start == end {
            return Ok(self);
        }

        let chunk_size = first.retriever().chunk_size();
        tracing::debug!(
            "overwriting {} [{:#x}, {:#x}) of {:#x}",
            self.name(),
            start,
            end,
            size
        );

        // walk to the chunk holding `start`. If `start` sits exactly at the
        // end of a full last chunk we stop one short and only extend its
        // next pointer.
        let target = start / chunk_size;
        let mut index = 0;
        let mut location = self.location().clone();
        let mut current = first.clone();
        while index < target {
            let Some(next) = current.retriever().next(&data_key)? else {
                break;
            };
            let node = self.network().get(&next).await?.ok_or_else(|| {
                FsError::MissingChunk {
                    location: next.clone(),
                    offset: (index + 1) * chunk_size,
                }
            })?;
            current = node.as_file()?.clone();
            location = next;
            index += 1;
        }
        if index < target && start != size {
            return Err(FsError::MissingChunk {
                location,
                offset: (index + 1) * chunk_size,
            });
        }

        let mut chunk_zero = first;
        let mut existing = Some(current);
        loop {
            let chunk_start = index * chunk_size;
            let hi = end.min(chunk_start + chunk_size) - chunk_start;
            let lo = (start.max(chunk_start) - chunk_start).min(hi);

            let mut plain = match &existing {
                Some(chunk) => chunk.retriever().decrypt(&data_key)?,
                None => Vec::new(),
            };
            if (plain.len() as u64) < hi {
                plain.resize(hi as usize, 0);
            }
            reader
                .read_exact(&mut plain[lo as usize..hi as usize])
                .await?;

            let more = chunk_start + chunk_size < end;
            let linked = match &existing {
                Some(chunk) => chunk.retriever().next(&data_key)?,
                None => None,
            };
            let fresh_next = linked.is_none() && more;
            let next = match linked {
                Some(next) => Some(next),
                None if more => Some(location.random_sibling()?),
                None => None,
            };

            let retriever = Retriever::encrypt(&data_key, chunk_size, &plain, next.as_ref())?;
            let (updated, expected) = match existing {
                Some(chunk) => (
                    chunk.with_retriever(retriever),
                    Some(KeyedNode::File(chunk).content_hash()?),
                ),
                None => (FileNode::new(chunk_zero.header().clone(), retriever), None),
            };
            let updated_node: KeyedNode = updated.clone().into();
            match self
                .network()
                .commit(&location, &signer, &updated_node, expected)
                .await?
            {
                CommitOutcome::Committed(_) => {}
                CommitOutcome::Conflict(_) => {
                    return Err(FsError::ConcurrentModification { location });
                }
            }
            if index == 0 {
                chunk_zero = updated;
            }

            let Some(next) = next.filter(|_| more) else {
                break;
            };
            existing = if fresh_next {
                None
            } else {
                let node = self.network().get(&next).await?;
                match node {
                    Some(node) => Some(node.as_file()?.clone()),
                    None if (index + 1) * chunk_size < size => {
                        return Err(FsError::MissingChunk {
                            location: next,
                            offset: (index + 1) * chunk_size,
                        });
                    }
                    None => None,
                }
            };
            location = next;
            index += 1;
        }

        if end > size {
            let props = self.properties().with_size(end);
            let grown = chunk_zero.with_properties(&base_key, &props)?;
            let prior = KeyedNode::File(chunk_zero).content_hash()?;
            let grown_node: KeyedNode = grown.clone().into();
            match self
                .network()
                .commit(self.location(), &signer, &grown_node, Some(prior))
                .await?
            {
                CommitOutcome::Committed(_) => {}
                CommitOutcome::Conflict(_) => {
                    return Err(FsError::ConcurrentModification {
                        location: self.location().clone(),
                    });
                }
            }
            chunk_zero = grown;
        }

        self.supersede();
        self.successor(self.capability().clone(), chunk_zero.into())
    }

}
