//! Loads content items from qBittorrent's `BT_backup` layout: a
//! `<hash>.torrent` and a `<hash>.fastresume` per torrent.

use std::{
    fs,
    path::{Component, Path, PathBuf},
};

use sha1::{Digest, Sha1};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    bencode::{self, Bencode},
    bitfield::{Bitfield, InvalidFlag},
    engine::ContentItem,
    storage::{FileStore, OpenError},
    to_hex,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode {path}: {source}")]
    Bencode {
        path: PathBuf,
        #[source]
        source: bencode::Error,
    },
    #[error("{hash}: missing '{field}'")]
    Missing { hash: String, field: &'static str },
    #[error("{hash}: invalid '{field}': {reason}")]
    Invalid {
        hash: String,
        field: &'static str,
        reason: String,
    },
    #[error("{hash}: malformed piece bitfield: {source}")]
    Pieces {
        hash: String,
        #[source]
        source: InvalidFlag,
    },
    #[error(transparent)]
    Open(#[from] OpenError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentFile {
    pub length: u64,
    /// Path components relative to the content root.
    pub path: Vec<String>,
}

/// The parts of a torrent's `info` dict the fill needs.
#[derive(Debug, Clone)]
pub struct TorrentInfo {
    pub name: String,
    pub piece_length: u64,
    pub total_length: u64,
    /// `None` for single-file torrents.
    pub files: Option<Vec<ContentFile>>,
    pub info_hash: [u8; 20],
}

impl TorrentInfo {
    pub fn from_bencode(info: &Bencode, hash: &str) -> Result<Self, Error> {
        let missing = |field| Error::Missing {
            hash: hash.to_string(),
            field,
        };

        let name = info
            .get("name")
            .and_then(Bencode::as_str_lossy)
            .ok_or_else(|| missing("name"))?;
        let piece_length = info
            .get("piece length")
            .and_then(Bencode::as_int)
            .ok_or_else(|| missing("piece length"))?;
        let piece_length = non_negative(piece_length, hash, "piece length")?;
        if piece_length == 0 {
            return Err(Error::Invalid {
                hash: hash.to_string(),
                field: "piece length",
                reason: "must be positive".into(),
            });
        }

        let (total_length, files) = if let Some(bfiles) = info.get("files") {
            let list = bfiles.as_list().ok_or_else(|| Error::Invalid {
                hash: hash.to_string(),
                field: "files",
                reason: "not a list".into(),
            })?;
            let mut files = Vec::with_capacity(list.len());
            let mut total = 0u64;
            for bfile in list {
                let length = bfile
                    .get("length")
                    .and_then(Bencode::as_int)
                    .ok_or_else(|| missing("files.length"))?;
                let length = non_negative(length, hash, "files.length")?;
                let path = bfile
                    .get("path")
                    .and_then(Bencode::as_list)
                    .ok_or_else(|| missing("files.path"))?
                    .iter()
                    .map(|p| p.as_str_lossy().ok_or_else(|| missing("files.path")))
                    .collect::<Result<Vec<_>, _>>()?;
                if path.is_empty() {
                    return Err(Error::Invalid {
                        hash: hash.to_string(),
                        field: "files.path",
                        reason: "empty path".into(),
                    });
                }
                for component in &path {
                    check_relative(component, hash, "files.path")?;
                }
                total = total.checked_add(length).ok_or_else(|| Error::Invalid {
                    hash: hash.to_string(),
                    field: "files.length",
                    reason: "total length overflows".into(),
                })?;
                files.push(ContentFile { length, path });
            }
            (total, Some(files))
        } else {
            let length = info
                .get("length")
                .and_then(Bencode::as_int)
                .ok_or_else(|| missing("length"))?;
            (non_negative(length, hash, "length")?, None)
        };

        let mut hasher = Sha1::new();
        hasher.update(bencode::encode(info));
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&hasher.finalize());

        Ok(TorrentInfo {
            name,
            piece_length,
            total_length,
            files,
            info_hash,
        })
    }
}

/// Everything known about one torrent before its files are opened.
#[derive(Debug, Clone)]
pub struct ItemMetadata {
    pub hash: String,
    pub info: TorrentInfo,
    pub save_path: PathBuf,
    pub content_name: String,
    /// One byte per piece, `1` when the piece is verified.
    pub pieces: Vec<u8>,
}

impl ItemMetadata {
    /// Reads `<hash>.fastresume` and `<hash>.torrent` from `dir`.
    ///
    /// The torrent file may be absent when the resume data embeds the `info`
    /// dict.
    pub fn load(dir: &Path, hash: &str) -> Result<Self, Error> {
        let resume = read_bencode(&dir.join(format!("{hash}.fastresume")))?;

        let torrent_path = dir.join(format!("{hash}.torrent"));
        let torrent = if torrent_path.exists() || resume.get("info").is_none() {
            Some(read_bencode(&torrent_path)?)
        } else {
            debug!(hash, "using info dict embedded in resume data");
            None
        };
        let binfo = match &torrent {
            Some(t) => t.get("info"),
            None => resume.get("info"),
        }
        .ok_or_else(|| Error::Missing {
            hash: hash.to_string(),
            field: "info",
        })?;

        Self::from_parts(hash, binfo, &resume)
    }

    pub fn from_parts(hash: &str, binfo: &Bencode, resume: &Bencode) -> Result<Self, Error> {
        let info = TorrentInfo::from_bencode(binfo, hash)?;
        if looks_like_v1_hash(hash) && !to_hex(&info.info_hash).eq_ignore_ascii_case(hash) {
            warn!(
                hash,
                computed = %to_hex(&info.info_hash),
                "info hash does not match the file name"
            );
        }

        let pieces = match resume.get("pieces") {
            Some(Bencode::Bytes(b)) => b.clone(),
            Some(_) => {
                return Err(Error::Invalid {
                    hash: hash.to_string(),
                    field: "pieces",
                    reason: "not a byte string".into(),
                });
            }
            None => {
                return Err(Error::Missing {
                    hash: hash.to_string(),
                    field: "pieces",
                });
            }
        };

        let save_path = resume
            .get("qBt-savePath")
            .or_else(|| resume.get("save_path"))
            .and_then(Bencode::as_str_lossy)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::Missing {
                hash: hash.to_string(),
                field: "qBt-savePath",
            })?;

        let content_name = resume
            .get("qBt-name")
            .or_else(|| resume.get("name"))
            .and_then(Bencode::as_str_lossy)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| info.name.clone());
        check_relative(&content_name, hash, "name")?;

        Ok(ItemMetadata {
            hash: hash.to_string(),
            info,
            save_path: PathBuf::from(save_path),
            content_name,
            pieces,
        })
    }

    /// Root of the content on disk: the file itself for single-file
    /// torrents, the top directory otherwise.
    pub fn content_root(&self) -> PathBuf {
        self.save_path.join(&self.content_name)
    }

    /// Files backing the content, in torrent order, with their lengths.
    pub fn file_layout(&self) -> Vec<(PathBuf, u64)> {
        let root = self.content_root();
        match &self.info.files {
            None => vec![(root, self.info.total_length)],
            Some(files) => files
                .iter()
                .map(|f| {
                    let mut path = root.clone();
                    path.extend(&f.path);
                    (path, f.length)
                })
                .collect(),
        }
    }

    pub fn bitfield(&self) -> Result<Bitfield, Error> {
        Bitfield::from_flags(&self.pieces).map_err(|source| Error::Pieces {
            hash: self.hash.clone(),
            source,
        })
    }

    /// Opens the backing files and builds the engine's view of this item.
    pub fn open(&self) -> Result<ContentItem<FileStore>, Error> {
        let bitfield = self.bitfield()?;
        let store = FileStore::open(&self.file_layout())?;
        Ok(ContentItem::new(
            self.hash.clone(),
            self.info.piece_length,
            self.info.total_length,
            bitfield,
            store,
        ))
    }
}

fn read_bencode(path: &Path) -> Result<Bencode, Error> {
    let raw = fs::read(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    bencode::decode(&raw).map_err(|source| Error::Bencode {
        path: path.to_path_buf(),
        source,
    })
}

fn non_negative(value: i64, hash: &str, field: &'static str) -> Result<u64, Error> {
    u64::try_from(value).map_err(|_| Error::Invalid {
        hash: hash.to_string(),
        field,
        reason: format!("negative value {value}"),
    })
}

/// Rejects path text that would resolve outside the directory it is joined to.
fn check_relative(text: &str, hash: &str, field: &'static str) -> Result<(), Error> {
    for component in Path::new(text).components() {
        let reason = match component {
            Component::ParentDir => "contains a parent directory reference",
            Component::RootDir | Component::Prefix(_) => "is an absolute path",
            Component::Normal(_) | Component::CurDir => continue,
        };
        return Err(Error::Invalid {
            hash: hash.to_string(),
            field,
            reason: format!("'{}' {}", text, reason),
        });
    }
    Ok(())
}

fn looks_like_v1_hash(hash: &str) -> bool {
    hash.len() == 40 && hash.bytes().all(|b| b.is_ascii_hexdigit())
}
