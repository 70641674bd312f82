//! Peer and client URL parsing.
//!
//! # Responsibilities
//! - Validate node URLs (`http`/`https`, `host:port`, no path)
//! - Parse `name=url[,name=url...]` cluster strings into a [`PeerUrlMap`]
//! - Render the canonical cluster string back
//!
//! # Design Decisions
//! - URLs are rendered without a trailing slash so that strings stored in the
//!   cluster file compare equal to what peers report
//! - Names keep a sorted URL list; the map itself is ordered by name

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use url::Url;

/// Errors raised while parsing URLs or cluster strings.
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("invalid URL {url:?}: {source}")]
    Invalid {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("URL scheme must be http or https: {0}")]
    UnsupportedScheme(String),

    #[error("URL address does not have the form \"host:port\": {0}")]
    MissingHostPort(String),

    #[error("URL must not contain a path, query or fragment: {0}")]
    HasPath(String),

    #[error("malformed cluster entry {0:?}, expected name=url")]
    MalformedEntry(String),

    #[error("empty URL given for {0:?}")]
    EmptyUrl(String),

    #[error("no URLs given")]
    Empty,
}

/// A validated peer or client URL.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeUrl(Url);

impl NodeUrl {
    /// Parse and validate a single URL.
    pub fn parse(raw: &str) -> Result<Self, UrlError> {
        let url = Url::parse(raw.trim()).map_err(|source| UrlError::Invalid {
            url: raw.to_string(),
            source,
        })?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(UrlError::UnsupportedScheme(raw.to_string()));
        }
        if url.host_str().is_none() || url.port_or_known_default().is_none() {
            return Err(UrlError::MissingHostPort(raw.to_string()));
        }
        if (url.path() != "/" && !url.path().is_empty())
            || url.query().is_some()
            || url.fragment().is_some()
        {
            return Err(UrlError::HasPath(raw.to_string()));
        }

        Ok(Self(url))
    }

    /// Whether connections on this URL are TLS-wrapped.
    pub fn is_tls(&self) -> bool {
        self.0.scheme() == "https"
    }

    pub fn port(&self) -> u16 {
        self.0.port_or_known_default().unwrap_or_default()
    }

    /// `host:port` form suitable for binding or dialing.
    pub fn host_port(&self) -> String {
        format!("{}:{}", self.0.host_str().unwrap_or_default(), self.port())
    }
}

impl fmt::Display for NodeUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.0.scheme(), self.host_port())
    }
}

impl FromStr for NodeUrl {
    type Err = UrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Parse a list of URLs, rejecting an empty list. The result is sorted.
pub fn parse_urls<S: AsRef<str>>(raw: &[S]) -> Result<Vec<NodeUrl>, UrlError> {
    if raw.is_empty() {
        return Err(UrlError::Empty);
    }
    let mut urls = raw
        .iter()
        .map(|u| NodeUrl::parse(u.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;
    urls.sort();
    Ok(urls)
}

/// Mapping from member name to the peer URLs it advertises.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerUrlMap(BTreeMap<String, Vec<NodeUrl>>);

impl PeerUrlMap {
    /// Parse a `name=url[,name=url...]` cluster string.
    ///
    /// A name may appear several times; its URLs are merged.
    pub fn parse(cluster: &str) -> Result<Self, UrlError> {
        let mut raw: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for entry in cluster.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (name, url) = entry
                .split_once('=')
                .ok_or_else(|| UrlError::MalformedEntry(entry.to_string()))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(UrlError::MalformedEntry(entry.to_string()));
            }
            if url.trim().is_empty() {
                return Err(UrlError::EmptyUrl(name.to_string()));
            }
            raw.entry(name.to_string()).or_default().push(url.trim().to_string());
        }

        if raw.is_empty() {
            return Err(UrlError::Empty);
        }

        let mut map = BTreeMap::new();
        for (name, urls) in raw {
            map.insert(name, parse_urls(&urls)?);
        }
        Ok(Self(map))
    }

    /// Single-entry map, used when the real membership is learned later.
    pub fn single(name: impl Into<String>, mut urls: Vec<NodeUrl>) -> Self {
        urls.sort();
        let mut map = BTreeMap::new();
        map.insert(name.into(), urls);
        Self(map)
    }

    /// All URLs of all members as sorted strings.
    pub fn urls(&self) -> Vec<String> {
        let mut all: Vec<String> = self
            .0
            .values()
            .flat_map(|urls| urls.iter().map(NodeUrl::to_string))
            .collect();
        all.sort();
        all
    }

    pub fn get(&self, name: &str) -> Option<&[NodeUrl]> {
        self.0.get(name).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[NodeUrl])> {
        self.0.iter().map(|(name, urls)| (name.as_str(), urls.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PeerUrlMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, urls) in &self.0 {
            for url in urls {
                if !first {
                    write!(f, ",")?;
                }
                first = false;
                write!(f, "{}={}", name, url)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_url_renders_without_trailing_slash() {
        let url = NodeUrl::parse("http://127.0.0.1:2380/").unwrap();
        assert_eq!(url.to_string(), "http://127.0.0.1:2380");
        assert_eq!(url.host_port(), "127.0.0.1:2380");
        assert!(!url.is_tls());
    }

    #[test]
    fn node_url_rejects_bad_input() {
        assert!(matches!(
            NodeUrl::parse("unix://socket:1"),
            Err(UrlError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            NodeUrl::parse("http://10.0.0.1:2380/path"),
            Err(UrlError::HasPath(_))
        ));
        assert!(matches!(NodeUrl::parse("not a url"), Err(UrlError::Invalid { .. })));
    }

    #[test]
    fn cluster_string_merges_names_and_sorts() {
        let map = PeerUrlMap::parse(
            "infra1=http://10.0.0.2:2380,infra0=http://10.0.0.1:2380,infra1=http://10.0.0.2:7001",
        )
        .unwrap();

        assert_eq!(map.len(), 2);
        assert_eq!(map.get("infra1").unwrap().len(), 2);
        assert_eq!(
            map.urls(),
            vec![
                "http://10.0.0.1:2380".to_string(),
                "http://10.0.0.2:2380".to_string(),
                "http://10.0.0.2:7001".to_string(),
            ]
        );
        assert_eq!(
            map.to_string(),
            "infra0=http://10.0.0.1:2380,infra1=http://10.0.0.2:2380,infra1=http://10.0.0.2:7001"
        );
    }

    #[test]
    fn cluster_string_errors() {
        assert!(matches!(PeerUrlMap::parse(""), Err(UrlError::Empty)));
        assert!(matches!(
            PeerUrlMap::parse("http://10.0.0.1:2380"),
            Err(UrlError::MalformedEntry(_))
        ));
        assert!(matches!(PeerUrlMap::parse("infra0="), Err(UrlError::EmptyUrl(_))));
    }
}
