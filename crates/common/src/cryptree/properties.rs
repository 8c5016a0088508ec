use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use mime::Mime;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A MIME type that may not be known
#[derive(Debug, Clone, PartialEq)]
pub struct MaybeMime(pub Option<Mime>);

impl MaybeMime {
    /// Guess from the extension of a file name
    pub fn from_name(name: &str) -> Self {
        MaybeMime(mime_guess::from_path(Path::new(name)).first())
    }
}

impl Serialize for MaybeMime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match &self.0 {
            Some(mime) => serializer.serialize_some(mime.as_ref()),
            None => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for MaybeMime {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<String> = Option::deserialize(deserializer)?;
        match opt {
            Some(s) => {
                let mime = Mime::from_str(&s).map_err(serde::de::Error::custom)?;
                Ok(MaybeMime(Some(mime)))
            }
            None => Ok(MaybeMime(None)),
        }
    }
}

/// Metadata of a file or directory.
///
/// Sealed separately from content, so a rename only re-encrypts this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileProperties {
    pub name: String,
    pub mime_type: MaybeMime,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub is_hidden: bool,
    pub thumbnail: Option<Vec<u8>>,
}

impl FileProperties {
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        let name = name.into();
        Self {
            mime_type: MaybeMime::from_name(&name),
            name,
            size,
            modified: Utc::now(),
            is_hidden: false,
            thumbnail: None,
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mime_type: MaybeMime(None),
            size: 0,
            modified: Utc::now(),
            is_hidden: false,
            thumbnail: None,
        }
    }

    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            modified: Utc::now(),
            ..self.clone()
        }
    }

    pub fn with_size(&self, size: u64) -> Self {
        Self {
            size,
            modified: Utc::now(),
            ..self.clone()
        }
    }

    pub fn mime(&self) -> Option<&Mime> {
        self.mime_type.0.as_ref()
    }
}
