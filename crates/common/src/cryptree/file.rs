use serde::{Deserialize, Serialize};

use crate::crypto::{Nonce, SymmetricKey};

use super::{open, seal, CryptreeError, FileProperties, Location, ParentLink};

/// Key material and metadata shared by every chunk of a file.
///
/// The base key acts as the file's parent key, so everything here except
/// the properties is sealed directly under it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileHeader {
    wrapped_data_key: Vec<u8>,
    wrapped_meta_key: Vec<u8>,
    properties: Vec<u8>,
    parent_link: Option<Vec<u8>>,
}

impl FileHeader {
    pub fn create(
        base_key: &SymmetricKey,
        data_key: &SymmetricKey,
        props: &FileProperties,
        parent_link: Option<&ParentLink>,
    ) -> Result<Self, CryptreeError> {
        let meta_key = SymmetricKey::generate()?;
        Ok(Self {
            wrapped_data_key: base_key.wrap(data_key)?,
            wrapped_meta_key: base_key.wrap(&meta_key)?,
            properties: seal(&meta_key, props)?,
            parent_link: parent_link.map(|link| seal(base_key, link)).transpose()?,
        })
    }

    pub fn data_key(&self, base_key: &SymmetricKey) -> Result<SymmetricKey, CryptreeError> {
        Ok(base_key.unwrap_key(&self.wrapped_data_key)?)
    }

    fn meta_key(&self, base_key: &SymmetricKey) -> Result<SymmetricKey, CryptreeError> {
        Ok(base_key.unwrap_key(&self.wrapped_meta_key)?)
    }

    pub fn properties(&self, base_key: &SymmetricKey) -> Result<FileProperties, CryptreeError> {
        open(&self.meta_key(base_key)?, &self.properties)
    }

    pub fn parent_link(&self, base_key: &SymmetricKey) -> Result<Option<ParentLink>, CryptreeError> {
        self.parent_link
            .as_ref()
            .map(|sealed| open(base_key, sealed))
            .transpose()
    }

    pub fn with_properties(
        &self,
        base_key: &SymmetricKey,
        props: &FileProperties,
    ) -> Result<Self, CryptreeError> {
        Ok(Self {
            properties: seal(&self.meta_key(base_key)?, props)?,
            ..self.clone()
        })
    }

    /// Re-seal under a new base key and a fresh meta key, keeping the data key
    pub fn rekey(
        &self,
        old_base_key: &SymmetricKey,
        new_base_key: &SymmetricKey,
        parent_link: Option<&ParentLink>,
    ) -> Result<Self, CryptreeError> {
        let data_key = self.data_key(old_base_key)?;
        let props = self.properties(old_base_key)?;
        Self::create(new_base_key, &data_key, &props, parent_link)
    }
}

/// One encrypted chunk of content and the sealed pointer to the next
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Retriever {
    chunk_size: u64,
    nonce: Nonce,
    ciphertext: Vec<u8>,
    /// `Option<Location>`, sealed with the data key
    next: Vec<u8>,
}

impl Retriever {
    pub fn encrypt(
        data_key: &SymmetricKey,
        chunk_size: u64,
        plaintext: &[u8],
        next: Option<&Location>,
    ) -> Result<Self, CryptreeError> {
        let nonce = data_key.create_nonce()?;
        Ok(Self {
            chunk_size,
            ciphertext: data_key.encrypt_with_nonce(&nonce, plaintext)?,
            nonce,
            next: seal(data_key, &next)?,
        })
    }

    pub fn decrypt(&self, data_key: &SymmetricKey) -> Result<Vec<u8>, CryptreeError> {
        Ok(data_key.decrypt_with_nonce(&self.nonce, &self.ciphertext)?)
    }

    pub fn next(&self, data_key: &SymmetricKey) -> Result<Option<Location>, CryptreeError> {
        open(data_key, &self.next)
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }
}

/// Encrypted file chunk node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileNode {
    header: FileHeader,
    dirty: bool,
    retriever: Retriever,
}

impl FileNode {
    pub fn new(header: FileHeader, retriever: Retriever) -> Self {
        Self {
            header,
            dirty: false,
            retriever,
        }
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn data_key(&self, base_key: &SymmetricKey) -> Result<SymmetricKey, CryptreeError> {
        self.header.data_key(base_key)
    }

    pub fn with_properties(
        &self,
        base_key: &SymmetricKey,
        props: &FileProperties,
    ) -> Result<Self, CryptreeError> {
        Ok(Self {
            header: self.header.with_properties(base_key, props)?,
            ..self.clone()
        })
    }

    /// Same header and dirty flag, new chunk content
    pub fn with_retriever(&self, retriever: Retriever) -> Self {
        Self {
            retriever,
            ..self.clone()
        }
    }

    /// Lazy re-key: new base key and meta key, the data key and the
    /// chunk content stay as they are until the file is cleaned.
    pub fn mark_dirty(
        &self,
        old_base_key: &SymmetricKey,
        new_base_key: &SymmetricKey,
        parent_link: Option<&ParentLink>,
    ) -> Result<Self, CryptreeError> {
        Ok(Self {
            header: self.header.rekey(old_base_key, new_base_key, parent_link)?,
            dirty: true,
            retriever: self.retriever.clone(),
        })
    }
}
