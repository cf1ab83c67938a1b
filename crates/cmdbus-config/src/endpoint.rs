use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// TCP address of a relay server (bind side) or of the server a relay client
/// connects to.
///
/// Endpoints are written as `HOST:PORT` or `tcp://HOST:PORT`. IPv6 literals
/// use the bracketed form (`[::1]:3333`).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct RelayEndpoint {
    host: String,
    port: u16,
}

impl RelayEndpoint {
    /// Builds an endpoint from its parts.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Host name or address literal, without IPv6 brackets.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port. Zero asks the operating system for an ephemeral port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for RelayEndpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(formatter, "tcp://[{}]:{}", self.host, self.port)
        } else {
            write!(formatter, "tcp://{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for RelayEndpoint {
    type Err = EndpointParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        if trimmed.contains("://") {
            return parse_url(trimmed);
        }

        let (host, port) = trimmed
            .rsplit_once(':')
            .ok_or_else(|| EndpointParseError::MissingPort(input.to_owned()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(EndpointParseError::MissingHost(input.to_owned()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| EndpointParseError::InvalidPort(input.to_owned()))?;
        Ok(Self::new(host, port))
    }
}

fn parse_url(input: &str) -> Result<RelayEndpoint, EndpointParseError> {
    let url = Url::parse(input)?;
    if url.scheme() != "tcp" {
        return Err(EndpointParseError::UnsupportedScheme(
            url.scheme().to_owned(),
        ));
    }
    let host = url
        .host_str()
        .ok_or_else(|| EndpointParseError::MissingHost(input.to_owned()))?;
    let port = url
        .port()
        .ok_or_else(|| EndpointParseError::MissingPort(input.to_owned()))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    Ok(RelayEndpoint::new(host, port))
}

impl TryFrom<String> for RelayEndpoint {
    type Error = EndpointParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RelayEndpoint> for String {
    fn from(endpoint: RelayEndpoint) -> Self {
        endpoint.to_string()
    }
}

/// Errors encountered while parsing a [`RelayEndpoint`] from text.
#[derive(Debug, Error)]
pub enum EndpointParseError {
    /// Scheme was something other than `tcp`.
    #[error("unsupported relay scheme '{0}'")]
    UnsupportedScheme(String),
    /// Host part was empty.
    #[error("missing relay host in '{0}'")]
    MissingHost(String),
    /// No `:PORT` suffix was present.
    #[error("missing relay port in '{0}'")]
    MissingPort(String),
    /// The port was not a number in `0..=65535`.
    #[error("invalid relay port in '{0}'")]
    InvalidPort(String),
    /// URL failed to parse.
    #[error(transparent)]
    Url(#[from] url::ParseError),
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("127.0.0.1:3333", "127.0.0.1", 3333)]
    #[case("localhost:0", "localhost", 0)]
    #[case("tcp://example.org:9000", "example.org", 9000)]
    #[case("[::1]:4000", "::1", 4000)]
    #[case(" 10.0.0.2:1 ", "10.0.0.2", 1)]
    fn parses_endpoints(#[case] input: &str, #[case] host: &str, #[case] port: u16) {
        let endpoint: RelayEndpoint = input.parse().expect("endpoint should parse");
        assert_eq!(endpoint.host(), host);
        assert_eq!(endpoint.port(), port);
    }

    #[rstest]
    #[case("localhost")]
    #[case(":3333")]
    #[case("localhost:http")]
    #[case("localhost:70000")]
    #[case("unix:///tmp/cmdbus.sock")]
    fn rejects_malformed_endpoints(#[case] input: &str) {
        assert!(input.parse::<RelayEndpoint>().is_err(), "{input} should fail");
    }

    #[test]
    fn displays_with_tcp_scheme() {
        assert_eq!(
            RelayEndpoint::new("127.0.0.1", 3333).to_string(),
            "tcp://127.0.0.1:3333"
        );
        assert_eq!(RelayEndpoint::new("::1", 80).to_string(), "tcp://[::1]:80");
    }

    #[test]
    fn display_round_trips_through_parse() {
        let endpoint = RelayEndpoint::new("::1", 80);
        let parsed: RelayEndpoint = endpoint.to_string().parse().expect("reparse");
        assert_eq!(parsed, endpoint);
    }
}
