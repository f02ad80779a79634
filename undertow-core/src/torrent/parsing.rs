//! Bencoded torrent file decoding and info hash calculation

use std::collections::HashMap;

use sha1::{Digest, Sha1};

use super::manifest::{Manifest, ManifestFile};
use super::{InfoHash, TorrentError};

type BencodeDict<'a> = HashMap<&'a [u8], bencode_rs::Value<'a>>;
type ParseResult<T> = Result<T, TorrentError>;

/// Bencode parsing utilities for torrent manifests.
pub struct BencodeParser;

impl BencodeParser {
    /// Decodes a torrent file into a manifest.
    ///
    /// The info hash is the SHA-1 of the raw `info` dictionary bytes exactly
    /// as they appear in the input.
    ///
    /// # Errors
    ///
    /// - `TorrentError::InvalidTorrentFile` - Malformed bencode or missing/invalid fields
    pub fn parse_manifest(torrent_bytes: &[u8]) -> Result<Manifest, TorrentError> {
        let parsed = bencode_rs::Value::parse(torrent_bytes).map_err(|e| invalid(format!(
            "Bencode parsing failed: {e:?}"
        )))?;

        let Some(bencode_rs::Value::Dictionary(root)) = parsed.first() else {
            return Err(invalid("Root element must be dictionary"));
        };

        let Some(bencode_rs::Value::Dictionary(info)) = root.get(b"info".as_slice()) else {
            return Err(invalid("Missing or invalid 'info' dictionary"));
        };

        let info_hash = Self::calculate_info_hash(torrent_bytes)?;
        let name = Self::extract_string(info, b"name")?;

        let piece_length = Self::extract_integer(info, b"piece length")?;
        let piece_length = u32::try_from(piece_length)
            .ok()
            .filter(|&length| length > 0)
            .ok_or_else(|| invalid(format!("Invalid piece length {piece_length}")))?;

        let pieces = Self::extract_bytes(info, b"pieces")?;
        if pieces.is_empty() || !pieces.len().is_multiple_of(20) {
            return Err(invalid(format!(
                "Pieces field length {} is not a multiple of 20",
                pieces.len()
            )));
        }
        let piece_hashes: Vec<[u8; 20]> = pieces
            .chunks_exact(20)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        let files = match (info.get(b"length".as_slice()), info.get(b"files".as_slice())) {
            (Some(_), _) => vec![ManifestFile {
                path: vec![name.clone()],
                length: Self::extract_length(info)?,
                offset: 0,
            }],
            (None, Some(bencode_rs::Value::List(entries))) => Self::extract_files(entries)?,
            _ => return Err(invalid("Missing 'files' or 'length' field")),
        };
        let total_length: u64 = files.iter().map(|file| file.length).sum();

        let expected_pieces = total_length.div_ceil(piece_length as u64);
        if expected_pieces != piece_hashes.len() as u64 {
            return Err(invalid(format!(
                "{} piece hashes for {total_length} bytes at piece length {piece_length}",
                piece_hashes.len()
            )));
        }

        Ok(Manifest {
            info_hash,
            name,
            piece_length,
            piece_hashes,
            total_length,
            files,
            announce_urls: Self::extract_announce_urls(root),
        })
    }

    /// SHA-1 of the raw bytes of the top-level `info` value
    fn calculate_info_hash(torrent_bytes: &[u8]) -> Result<InfoHash, TorrentError> {
        let (start, end) = Self::locate_info_dictionary(torrent_bytes)?;
        let digest = Sha1::digest(&torrent_bytes[start..end]);

        let mut hash = [0u8; 20];
        hash.copy_from_slice(&digest);
        Ok(InfoHash::new(hash))
    }

    /// Byte range of the top-level `info` value.
    ///
    /// Walks the root dictionary key by key so an `info` string nested inside
    /// another value is never mistaken for the key.
    fn locate_info_dictionary(data: &[u8]) -> Result<(usize, usize), TorrentError> {
        if data.first() != Some(&b'd') {
            return Err(invalid("Expected dictionary start"));
        }

        let mut pos = 1;
        while pos < data.len() && data[pos] != b'e' {
            let key_end = Self::element_end(data, pos)?;
            let key = Self::string_contents(data, pos, key_end)?;
            let value_end = Self::element_end(data, key_end)?;

            if key == b"info" {
                return Ok((key_end, value_end));
            }
            pos = value_end;
        }

        Err(invalid("Could not find info dictionary in data"))
    }

    /// Position just past the bencode element starting at `start`.
    ///
    /// # Errors
    ///
    /// - `TorrentError::InvalidTorrentFile` - Truncated or malformed element
    pub fn element_end(data: &[u8], start: usize) -> Result<usize, TorrentError> {
        let mut pos = start;
        let mut depth = 0usize;

        loop {
            let Some(&byte) = data.get(pos) else {
                return Err(invalid("Incomplete bencode element"));
            };

            match byte {
                b'd' | b'l' => {
                    depth += 1;
                    pos += 1;
                }
                b'e' if depth > 0 => {
                    depth -= 1;
                    pos += 1;
                }
                b'i' => {
                    let terminator = data[pos..]
                        .iter()
                        .position(|&b| b == b'e')
                        .ok_or_else(|| invalid("Unterminated integer"))?;
                    pos += terminator + 1;
                }
                b'0'..=b'9' => {
                    let colon = data[pos..]
                        .iter()
                        .position(|&b| b == b':')
                        .ok_or_else(|| invalid("Invalid string format"))?;
                    let length: usize = std::str::from_utf8(&data[pos..pos + colon])
                        .ok()
                        .and_then(|digits| digits.parse().ok())
                        .ok_or_else(|| invalid("Invalid string length"))?;
                    pos += colon + 1 + length;
                    if pos > data.len() {
                        return Err(invalid("String exceeds input"));
                    }
                }
                _ => return Err(invalid("Invalid bencode character")),
            }

            if depth == 0 {
                return Ok(pos);
            }
        }
    }

    fn string_contents(data: &[u8], start: usize, end: usize) -> ParseResult<&[u8]> {
        let colon = data[start..end]
            .iter()
            .position(|&b| b == b':')
            .ok_or_else(|| invalid("Dictionary key must be a string"))?;
        Ok(&data[start + colon + 1..end])
    }

    fn extract_string(dict: &BencodeDict<'_>, key: &[u8]) -> ParseResult<String> {
        let bytes = Self::extract_bytes(dict, key)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| {
            invalid(format!(
                "Invalid UTF-8 in field: {:?}",
                String::from_utf8_lossy(key)
            ))
        })
    }

    fn extract_bytes<'a>(dict: &'a BencodeDict<'_>, key: &[u8]) -> ParseResult<&'a [u8]> {
        match dict.get(key) {
            Some(bencode_rs::Value::Bytes(bytes)) => Ok(*bytes),
            _ => Err(invalid(format!(
                "Missing or invalid field: {:?}",
                String::from_utf8_lossy(key)
            ))),
        }
    }

    fn extract_integer(dict: &BencodeDict<'_>, key: &[u8]) -> ParseResult<i64> {
        match dict.get(key) {
            Some(bencode_rs::Value::Integer(value)) => Ok(*value),
            _ => Err(invalid(format!(
                "Missing or invalid integer field: {:?}",
                String::from_utf8_lossy(key)
            ))),
        }
    }

    fn extract_length(dict: &BencodeDict<'_>) -> ParseResult<u64> {
        let length = Self::extract_integer(dict, b"length")?;
        u64::try_from(length).map_err(|_| invalid(format!("Negative file length {length}")))
    }

    /// Multi-file entries with cumulative offsets into the contiguous store
    fn extract_files(entries: &[bencode_rs::Value<'_>]) -> ParseResult<Vec<ManifestFile>> {
        let mut files = Vec::with_capacity(entries.len());
        let mut offset = 0u64;

        for entry in entries {
            let bencode_rs::Value::Dictionary(file_dict) = entry else {
                return Err(invalid("Invalid file entry type"));
            };

            let length = Self::extract_length(file_dict)?;
            let Some(bencode_rs::Value::List(components)) = file_dict.get(b"path".as_slice())
            else {
                return Err(invalid("Missing or invalid path in file"));
            };

            let path = components
                .iter()
                .map(|component| match component {
                    bencode_rs::Value::Bytes(bytes) => String::from_utf8(bytes.to_vec())
                        .map_err(|_| invalid("Invalid UTF-8 in file path")),
                    _ => Err(invalid("Invalid path component type")),
                })
                .collect::<ParseResult<Vec<_>>>()?;

            files.push(ManifestFile {
                path,
                length,
                offset,
            });
            offset += length;
        }

        if files.is_empty() {
            return Err(invalid("Empty files list"));
        }
        Ok(files)
    }

    /// `announce` followed by every `announce-list` tier, duplicates removed
    fn extract_announce_urls(root: &BencodeDict<'_>) -> Vec<String> {
        let mut urls: Vec<String> = Vec::new();
        let mut push = |bytes: &[u8]| {
            if let Ok(url) = String::from_utf8(bytes.to_vec())
                && !urls.contains(&url)
            {
                urls.push(url);
            }
        };

        if let Some(bencode_rs::Value::Bytes(announce)) = root.get(b"announce".as_slice()) {
            push(*announce);
        }

        if let Some(bencode_rs::Value::List(tiers)) = root.get(b"announce-list".as_slice()) {
            for tier in tiers {
                if let bencode_rs::Value::List(tier_urls) = tier {
                    for url in tier_urls {
                        if let bencode_rs::Value::Bytes(url) = url {
                            push(*url);
                        }
                    }
                }
            }
        }

        urls
    }
}

fn invalid(reason: impl Into<String>) -> TorrentError {
    TorrentError::InvalidTorrentFile {
        reason: reason.into(),
    }
}
