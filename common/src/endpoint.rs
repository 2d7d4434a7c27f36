use std::fmt;

use crate::config::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn default_port(self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Endpoint {
    pub fn parse(url: &str) -> Result<Self, ConfigError> {
        let url = url.trim();
        let (scheme, rest) = if let Some(rest) = url.strip_prefix("http://") {
            (Scheme::Http, rest)
        } else if let Some(rest) = url.strip_prefix("https://") {
            (Scheme::Https, rest)
        } else {
            return Err(ConfigError::UnsupportedScheme(url.to_string()));
        };

        let (authority, path) = match rest.find(['/', '?']) {
            Some(idx) if rest[idx..].starts_with('/') => (&rest[..idx], rest[idx..].to_string()),
            Some(idx) => (&rest[..idx], format!("/{}", &rest[idx..])),
            None => (rest, "/".to_string()),
        };

        let (host, port) = split_authority(authority)?;
        if host.is_empty() {
            return Err(ConfigError::MissingHost(url.to_string()));
        }

        Ok(Self {
            scheme,
            host: host.to_string(),
            port: port.unwrap_or_else(|| scheme.default_port()),
            path,
        })
    }

    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    // The port is elided when it is the scheme default.
    pub fn host_header(&self) -> String {
        if self.port == self.scheme.default_port() {
            if self.host.contains(':') {
                format!("[{}]", self.host)
            } else {
                self.host.clone()
            }
        } else {
            self.authority()
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}{}",
            self.scheme.as_str(),
            self.host_header(),
            self.path
        )
    }
}

fn split_authority(authority: &str) -> Result<(&str, Option<u16>), ConfigError> {
    // drop any userinfo
    let authority = authority.rsplit('@').next().unwrap_or(authority);

    if let Some(rest) = authority.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| ConfigError::MissingHost(authority.to_string()))?;
        let port = match after.strip_prefix(':') {
            Some(port) => Some(parse_port(port)?),
            None if after.is_empty() => None,
            None => return Err(ConfigError::InvalidPort(after.to_string())),
        };
        return Ok((host, port));
    }

    match authority.rsplit_once(':') {
        Some((host, port)) => Ok((host, Some(parse_port(port)?))),
        None => Ok((authority, None)),
    }
}

fn parse_port(port: &str) -> Result<u16, ConfigError> {
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(ConfigError::InvalidPort(port.to_string())),
        Ok(port) => Ok(port),
    }
}
