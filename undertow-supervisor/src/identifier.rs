//! Deciding which player targets the open hook should hand to the gateway.

use std::net::IpAddr;

use undertow_core::ingest::classify_kind;
use url::Url;

/// Whether `target` is a URL the gateway itself produced.
///
/// Stream URLs point at a loopback or private address under `/torrents/`;
/// re-ingesting them would loop.
pub fn is_gateway_stream_url(target: &str) -> bool {
    let Ok(url) = Url::parse(target.trim()) else {
        return false;
    };
    if !matches!(url.scheme(), "http" | "https") || !url.path().starts_with("/torrents/") {
        return false;
    }
    match url.host_str() {
        Some("localhost") => true,
        Some(host) => host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .is_ok_and(|ip| is_local(&ip)),
        None => false,
    }
}

fn is_local(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => v6.is_loopback(),
    }
}

/// Whether the open hook should submit `target` to the gateway.
pub fn should_ingest(target: &str) -> bool {
    classify_kind(target).is_some() && !is_gateway_stream_url(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_torrent_identifiers_are_ingested() {
        assert!(should_ingest("magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef01234567"));
        assert!(should_ingest("/home/me/film.torrent"));
        assert!(should_ingest("0123456789abcdef0123456789abcdef01234567"));
        assert!(should_ingest("https://example.org/film.torrent"));
    }

    #[test]
    fn test_gateway_output_is_not_ingested() {
        let hash = "0123456789abcdef0123456789abcdef01234567";
        for url in [
            format!("http://127.0.0.1:6969/torrents/{hash}/a.mp4"),
            format!("http://localhost:6969/torrents/{hash}/a.mp4"),
            format!("http://192.168.1.20:6969/torrents/{hash}/Season%201/a.mkv"),
            format!("http://10.0.0.5:6969/torrents/{hash}/a.mp4"),
        ] {
            assert!(is_gateway_stream_url(&url), "{url}");
            assert!(!should_ingest(&url), "{url}");
        }
    }

    #[test]
    fn test_other_targets_are_left_alone() {
        assert!(!should_ingest("/home/me/film.mkv"));
        assert!(!should_ingest("memory://#EXTM3U"));
        // Public hosts under /torrents/ are still remote descriptors
        assert!(should_ingest("http://8.8.8.8/torrents/x.torrent"));
    }
}
