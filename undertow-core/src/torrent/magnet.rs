//! Magnet URI parsing

use url::Url;

use super::{InfoHash, TorrentError};

/// Parsed `magnet:` URI.
///
/// Besides the info-hash, keeps the parameters the bundled engine can act
/// on: exact sources (`xs`) point at full descriptors, web seeds (`ws`)
/// serve content over HTTP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagnetLink {
    pub info_hash: InfoHash,
    pub display_name: Option<String>,
    pub trackers: Vec<String>,
    pub exact_sources: Vec<String>,
    pub web_seeds: Vec<String>,
}

impl MagnetLink {
    /// Parses a magnet URI.
    ///
    /// Accepts `urn:btih:` topics in both hex (40 chars) and base32 (32 chars).
    ///
    /// # Errors
    ///
    /// - `TorrentError::InvalidMagnetLink` - Malformed URI or missing btih topic
    pub fn parse(uri: &str) -> Result<Self, TorrentError> {
        let magnet = magnet_url::Magnet::new(uri).map_err(|e| TorrentError::InvalidMagnetLink {
            reason: format!("{e:?}"),
        })?;

        if magnet.hash_type() != Some("btih") {
            return Err(TorrentError::InvalidMagnetLink {
                reason: "missing urn:btih exact topic".to_string(),
            });
        }
        let hash = magnet.hash().ok_or_else(|| TorrentError::InvalidMagnetLink {
            reason: "missing info hash".to_string(),
        })?;
        let info_hash = decode_btih(hash)?;

        let parsed = Url::parse(uri).map_err(|e| TorrentError::InvalidMagnetLink {
            reason: e.to_string(),
        })?;
        let mut exact_sources = Vec::new();
        let mut web_seeds = Vec::new();
        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                "xs" => exact_sources.push(value.into_owned()),
                "ws" => web_seeds.push(value.into_owned()),
                _ => {}
            }
        }

        Ok(Self {
            info_hash,
            display_name: magnet.display_name().map(|s| s.to_string()),
            trackers: magnet.trackers().to_vec(),
            exact_sources,
            web_seeds,
        })
    }
}

fn decode_btih(hash: &str) -> Result<InfoHash, TorrentError> {
    match hash.len() {
        40 => InfoHash::from_hex(hash).map_err(|_| TorrentError::InvalidMagnetLink {
            reason: format!("invalid hex info hash: {hash}"),
        }),
        32 => decode_base32(hash)
            .map(InfoHash::new)
            .ok_or_else(|| TorrentError::InvalidMagnetLink {
                reason: format!("invalid base32 info hash: {hash}"),
            }),
        other => Err(TorrentError::InvalidMagnetLink {
            reason: format!("info hash has length {other}, expected 40 or 32"),
        }),
    }
}

/// RFC 4648 base32 without padding, exactly 160 bits.
fn decode_base32(input: &str) -> Option<[u8; 20]> {
    let mut out = [0u8; 20];
    let mut buffer: u64 = 0;
    let mut bits = 0;
    let mut written = 0;
    for c in input.bytes() {
        let value = match c.to_ascii_uppercase() {
            c @ b'A'..=b'Z' => c - b'A',
            c @ b'2'..=b'7' => c - b'2' + 26,
            _ => return None,
        };
        buffer = (buffer << 5) | value as u64;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            *out.get_mut(written)? = (buffer >> bits) as u8;
            written += 1;
        }
    }
    (written == 20).then_some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX: &str = "0123456789abcdef0123456789abcdef01234567";

    #[test]
    fn test_parse_magnet_with_sources() {
        let uri = format!(
            "magnet:?xt=urn:btih:{HEX}&dn=Test%20Torrent&tr=http://tracker.example.com/announce\
             &xs=http%3A%2F%2Fhost%2Fa.torrent&ws=http%3A%2F%2Fseed%2Ffiles%2F"
        );
        let magnet = MagnetLink::parse(&uri).unwrap();

        assert_eq!(magnet.info_hash.to_string(), HEX);
        assert_eq!(magnet.display_name.as_deref(), Some("Test Torrent"));
        assert_eq!(magnet.exact_sources, vec!["http://host/a.torrent"]);
        assert_eq!(magnet.web_seeds, vec!["http://seed/files/"]);
        assert_eq!(magnet.trackers.len(), 1);
    }

    #[test]
    fn test_parse_base32_topic() {
        // base32 of 20 zero bytes
        let uri = "magnet:?xt=urn:btih:AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";
        let magnet = MagnetLink::parse(uri).unwrap();
        assert_eq!(magnet.info_hash, InfoHash::new([0u8; 20]));
    }

    #[test]
    fn test_base32_matches_hex() {
        // 20 bytes of 0xff
        let decoded = decode_base32("77777777777777777777777777777777").unwrap();
        assert_eq!(decoded, [0xffu8; 20]);
        assert!(decode_base32("0000").is_none());
        assert!(decode_base32("AAAA").is_none());
    }

    #[test]
    fn test_rejects_magnet_without_topic() {
        assert!(MagnetLink::parse("magnet:?dn=Test").is_err());
        assert!(MagnetLink::parse("magnet:?xt=urn:btih:tooshort").is_err());
        assert!(MagnetLink::parse("not a magnet").is_err());
    }
}
