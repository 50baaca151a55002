use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A capability token attached to an API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// Grants every data-path operation (projects, members, sync).
    Sync,
    /// Read access to one admin resource class.
    AdminRead(AdminResource),
    /// Bulk export on the admin path.
    AdminExport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminResource {
    Server,
    Projects,
    Events,
    Snapshots,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown scope {0:?}")]
pub struct UnknownScope(String);

impl FromStr for Scope {
    type Err = UnknownScope;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync" => Ok(Self::Sync),
            "admin:export" => Ok(Self::AdminExport),
            "admin:read:server" => Ok(Self::AdminRead(AdminResource::Server)),
            "admin:read:projects" => Ok(Self::AdminRead(AdminResource::Projects)),
            "admin:read:events" => Ok(Self::AdminRead(AdminResource::Events)),
            "admin:read:snapshots" => Ok(Self::AdminRead(AdminResource::Snapshots)),
            other => Err(UnknownScope(other.to_owned())),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync => f.write_str("sync"),
            Self::AdminExport => f.write_str("admin:export"),
            Self::AdminRead(AdminResource::Server) => f.write_str("admin:read:server"),
            Self::AdminRead(AdminResource::Projects) => f.write_str("admin:read:projects"),
            Self::AdminRead(AdminResource::Events) => f.write_str("admin:read:events"),
            Self::AdminRead(AdminResource::Snapshots) => f.write_str("admin:read:snapshots"),
        }
    }
}

/// Parses a comma-delimited scope list, e.g. `"sync,admin:read:server"`.
///
/// # Errors
///
/// Returns the first unrecognized token.
pub fn parse_scope_list(raw: &str) -> Result<Vec<Scope>, UnknownScope> {
    raw.split(',')
        .map(str::trim)
        .filter(|tok| !tok.is_empty())
        .map(str::parse)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_declared_scope() {
        let scopes = parse_scope_list("sync, admin:read:server,admin:export").unwrap();
        assert_eq!(
            scopes,
            vec![
                Scope::Sync,
                Scope::AdminRead(AdminResource::Server),
                Scope::AdminExport,
            ]
        );
    }

    #[test]
    fn rejects_unknown_token() {
        assert!(parse_scope_list("sync,bogus").is_err());
    }

    #[test]
    fn round_trips_display_and_parse() {
        for s in [
            Scope::Sync,
            Scope::AdminExport,
            Scope::AdminRead(AdminResource::Events),
        ] {
            assert_eq!(s.to_string().parse::<Scope>().unwrap(), s);
        }
    }
}
