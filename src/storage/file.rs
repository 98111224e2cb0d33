// SPDX-FileCopyrightText: 2022-2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use log::debug;

use crate::{
    error::{self, Result},
    key::{Credential, Identity, Signer as _},
    metadata,
};

use super::{KeyStore, Location};

/// Stores each credential as a JSON file in a directory, which defaults to
/// `keys` under the per-user data directory.
pub struct File {
    dir: PathBuf,
}

impl File {
    pub fn new() -> Option<Self> {
        metadata::PROJECT_DIRS.as_ref().map(|dirs| Self {
            dir: dirs.data_dir().join("keys"),
        })
    }

    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_owned(),
        }
    }

    /// Service account keys live in `service-accounts/<name>.json` and user
    /// keys in `contexts/<context>/<name>.json`. Each part is escaped so that
    /// no two identities share a file.
    fn path(&self, identity: &Identity) -> PathBuf {
        let file_name = format!("{}.json", escape(identity.name()));
        if identity.context().is_empty() {
            self.dir.join("service-accounts").join(file_name)
        } else {
            self.dir
                .join("contexts")
                .join(escape(identity.context()))
                .join(file_name)
        }
    }
}

/// Percent-encodes path separators, the escape character itself, and a
/// leading dot.
fn escape(part: &str) -> String {
    let mut escaped = String::with_capacity(part.len());
    for (i, c) in part.chars().enumerate() {
        match c {
            '%' => escaped.push_str("%25"),
            '/' => escaped.push_str("%2F"),
            '\\' => escaped.push_str("%5C"),
            '.' if i == 0 => escaped.push_str("%2E"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn create(path: &Path) -> io::Result<fs::File> {
    let mut options = fs::OpenOptions::new();
    _ = options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt as _;
        _ = options.mode(0o600);
    }
    options.open(path)
}

#[async_trait]
impl KeyStore for File {
    async fn read(&self, identity: &Identity) -> Result<Option<Credential>> {
        let path = self.path(identity);
        match fs::File::open(&path) {
            Ok(fp) => {
                debug!("Reading credential from {}", path.display());
                Ok(Some(serde_json::from_reader::<fs::File, Credential>(fp)?))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, credential: &Credential) -> Result<Location> {
        let path = self.path(credential.identity());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = create(&path)?;
        serde_json::to_writer(file, credential)?;
        Ok(Location::File(path))
    }

    fn location(&self, identity: &Identity) -> Location {
        Location::File(self.path(identity))
    }

    async fn delete(&self, identity: &Identity) -> Result<()> {
        match fs::remove_file(self.path(identity)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(error::Storage::NotFound(identity.clone()).into())
            }
            Err(e) => Err(e.into()),
        }
    }
}
