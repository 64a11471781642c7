// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Computing which versions a cluster may upgrade to.
//!
//! A cluster at `major.minor.patch` may move to any supported version strictly
//! greater than its own and strictly less than `major.(minor + 2).0`; that is,
//! patch upgrades and at most one minor release ahead. Ordering only looks at
//! the numeric triple: pre-release and build metadata are ignored.

use crate::catalog::VersionCatalog;
use semver::Version;
use serde::Serialize;
use std::cmp::Ordering;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VersionError {
    #[error("invalid version format {version:?}")]
    InvalidVersionFormat {
        version: String,
        #[source]
        error: semver::Error,
    },

    #[error("cannot downgrade DC/OS from {current} to {requested}")]
    DowngradeRejected { current: String, requested: String },

    #[error("{}", display_unsupported(.requested, .current.as_deref()))]
    UnsupportedVersion { requested: String, current: Option<String> },
}

fn display_unsupported(requested: &str, current: Option<&str>) -> String {
    match current {
        Some(current) => format!(
            "upgrade from DC/OS {current} to {requested} is not supported"
        ),
        None => format!("DC/OS version {requested} is not supported"),
    }
}

/// Parse `version` as a semantic version.
pub fn parse_version(version: &str) -> Result<Version, VersionError> {
    Version::parse(version).map_err(|error| {
        VersionError::InvalidVersionFormat { version: version.to_owned(), error }
    })
}

fn release_order(a: &Version, b: &Version) -> Ordering {
    (a.major, a.minor, a.patch).cmp(&(b.major, b.minor, b.patch))
}

/// Supported versions with upgrade information, in the shape printed by the
/// `orchestrators` command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionProfile {
    pub orchestrator_type: &'static str,
    pub orchestrator_version: String,
    pub default: bool,
    pub upgrades: Vec<String>,
}

#[derive(Clone, Copy, Debug)]
pub struct VersionResolver {
    catalog: VersionCatalog,
}

impl VersionResolver {
    pub fn new(catalog: VersionCatalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &VersionCatalog {
        &self.catalog
    }

    /// Every catalog version reachable from `current`, in catalog order.
    ///
    /// `current` itself need not be in the catalog. Returns an empty list,
    /// not an error, when nothing is reachable.
    pub fn upgrades_from(
        &self,
        current: &str,
    ) -> Result<Vec<&'static str>, VersionError> {
        let current = parse_version(current)?;
        // Past the largest minor release the window runs to the end of the
        // major release.
        let ceiling = current
            .minor
            .checked_add(2)
            .map(|minor| Version::new(current.major, minor, 0));
        let below_ceiling = |version: &Version| match &ceiling {
            Some(ceiling) => release_order(version, ceiling) == Ordering::Less,
            None => version.major == current.major,
        };

        let mut upgrades = Vec::new();
        for candidate in self.catalog.versions() {
            let parsed = parse_version(candidate)?;
            if release_order(&parsed, &current) == Ordering::Greater
                && below_ceiling(&parsed)
                && !upgrades.contains(&candidate)
            {
                upgrades.push(candidate);
            }
        }
        Ok(upgrades)
    }

    /// Check that a cluster at `current` may be upgraded to `requested`.
    ///
    /// Equal versions are rejected as unsupported; callers that want re-runs
    /// of a completed upgrade to be a no-op must check for that first.
    pub fn validate_upgrade_request(
        &self,
        current: &str,
        requested: &str,
    ) -> Result<(), VersionError> {
        let current_version = parse_version(current)?;
        let requested_version = parse_version(requested)?;
        if release_order(&requested_version, &current_version)
            == Ordering::Less
        {
            return Err(VersionError::DowngradeRejected {
                current: current.to_owned(),
                requested: requested.to_owned(),
            });
        }

        if !self.upgrades_from(current)?.contains(&requested) {
            return Err(VersionError::UnsupportedVersion {
                requested: requested.to_owned(),
                current: Some(current.to_owned()),
            });
        }
        Ok(())
    }

    /// Describe every supported version, or only `filter` if given.
    ///
    /// Upgrades are sorted in ascending version order.
    pub fn version_profiles(
        &self,
        filter: Option<&str>,
    ) -> Result<Vec<VersionProfile>, VersionError> {
        let versions: Vec<&'static str> = match filter {
            Some(version) => match self.catalog.entry(version) {
                Some(entry) => vec![entry.version],
                None => {
                    return Err(VersionError::UnsupportedVersion {
                        requested: version.to_owned(),
                        current: None,
                    })
                }
            },
            None => self.catalog.versions().collect(),
        };

        versions
            .into_iter()
            .map(|version| {
                let mut upgrades = self
                    .upgrades_from(version)?
                    .into_iter()
                    .map(|upgrade| Ok((parse_version(upgrade)?, upgrade)))
                    .collect::<Result<Vec<_>, VersionError>>()?;
                upgrades.sort_by(|(a, _), (b, _)| release_order(a, b));
                Ok(VersionProfile {
                    orchestrator_type: "DCOS",
                    orchestrator_version: version.to_owned(),
                    default: version == self.catalog.default_version(),
                    upgrades: upgrades
                        .into_iter()
                        .map(|(_, upgrade)| upgrade.to_owned())
                        .collect(),
                })
            })
            .collect()
    }
}
