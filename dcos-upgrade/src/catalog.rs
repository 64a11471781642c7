// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The compiled-in table of DC/OS versions this tool knows how to deploy and
//! upgrade.

use crate::scripts::AssetFamily;

/// One supported DC/OS release.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CatalogEntry {
    pub version: &'static str,
    /// Default download location of `dcos_generate_config.sh`.
    pub linux_installer_url: &'static str,
    /// Default download location of the Windows installer archive.
    pub windows_installer_url: &'static str,
    /// Which set of script and config templates drives this release.
    pub assets: AssetFamily,
}

const WINDOWS_1_11_INSTALLER_URL: &str = "https://dcos-mirror.azureedge.net/dcos/1-11-6/dcos_generate_config.windows.tar.xz";

static SUPPORTED_VERSIONS: &[CatalogEntry] = &[
    CatalogEntry {
        version: "1.11.0",
        linux_installer_url: "https://dcos-mirror.azureedge.net/dcos/1-11-0/dcos_generate_config.sh",
        windows_installer_url: WINDOWS_1_11_INSTALLER_URL,
        assets: AssetFamily::Dcos1_11,
    },
    CatalogEntry {
        version: "1.11.2",
        linux_installer_url: "https://dcos-mirror.azureedge.net/dcos/1-11-2/dcos_generate_config.sh",
        windows_installer_url: WINDOWS_1_11_INSTALLER_URL,
        assets: AssetFamily::Dcos1_11,
    },
    CatalogEntry {
        version: "1.11.4",
        linux_installer_url: "https://dcos-mirror.azureedge.net/dcos/1-11-4/dcos_generate_config.sh",
        windows_installer_url: WINDOWS_1_11_INSTALLER_URL,
        assets: AssetFamily::Dcos1_11,
    },
    CatalogEntry {
        version: "1.11.5",
        linux_installer_url: "https://dcos-mirror.azureedge.net/dcos/1-11-5/dcos_generate_config.sh",
        windows_installer_url: WINDOWS_1_11_INSTALLER_URL,
        assets: AssetFamily::Dcos1_11,
    },
    CatalogEntry {
        version: "1.11.6",
        linux_installer_url: "https://dcos-mirror.azureedge.net/dcos/1-11-6/dcos_generate_config.sh",
        windows_installer_url: WINDOWS_1_11_INSTALLER_URL,
        assets: AssetFamily::Dcos1_11,
    },
    CatalogEntry {
        version: "1.12.0",
        linux_installer_url: "https://dcos-mirror.azureedge.net/dcos/1-12-0/dcos_generate_config.sh",
        windows_installer_url: "https://dcos-mirror.azureedge.net/dcos/1-12-0/dcos_generate_config.windows.tar.xz",
        // 1.12 ships the same bootstrap layout as 1.11.
        assets: AssetFamily::Dcos1_11,
    },
];

const DEFAULT_VERSION: &str = "1.11.6";

/// An immutable set of supported versions with one designated default.
#[derive(Clone, Copy, Debug)]
pub struct VersionCatalog {
    entries: &'static [CatalogEntry],
    default: &'static str,
}

impl VersionCatalog {
    /// The catalog compiled into this binary.
    pub fn builtin() -> Self {
        Self { entries: SUPPORTED_VERSIONS, default: DEFAULT_VERSION }
    }

    /// Build a catalog from an arbitrary static table.
    ///
    /// # Panics
    ///
    /// Panics if `default` is not one of the entries.
    pub fn from_entries(
        entries: &'static [CatalogEntry],
        default: &'static str,
    ) -> Self {
        assert!(
            entries.iter().any(|entry| entry.version == default),
            "BUG: default version {default} is not in the catalog"
        );
        Self { entries, default }
    }

    pub fn is_supported(&self, version: &str) -> bool {
        self.entry(version).is_some()
    }

    pub fn default_version(&self) -> &'static str {
        self.default
    }

    pub fn entry(&self, version: &str) -> Option<&'static CatalogEntry> {
        self.entries.iter().find(|entry| entry.version == version)
    }

    /// All supported versions, in table order.
    pub fn versions(&self) -> impl Iterator<Item = &'static str> {
        self.entries.iter().map(|entry| entry.version)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn builtin_membership() {
        let catalog = VersionCatalog::builtin();
        for version in ["1.11.0", "1.11.2", "1.11.6", "1.12.0"] {
            assert!(catalog.is_supported(version), "{version}");
        }
        for version in ["0.1.1", "1.10.0", "1.11", "1.13.0", ""] {
            assert!(!catalog.is_supported(version), "{version}");
        }
        assert!(catalog.is_supported(catalog.default_version()));
    }

    #[test]
    fn builtin_versions_are_unique_and_valid() {
        let catalog = VersionCatalog::builtin();
        let mut seen = BTreeSet::new();
        for version in catalog.versions() {
            semver::Version::parse(version)
                .unwrap_or_else(|e| panic!("{version}: {e}"));
            assert!(seen.insert(version), "duplicate entry {version}");
        }
    }

    #[test]
    fn installer_urls_follow_dashed_version() {
        let catalog = VersionCatalog::builtin();
        for version in catalog.versions() {
            let entry = catalog.entry(version).unwrap();
            let dashed = version.replace('.', "-");
            assert_eq!(
                entry.linux_installer_url,
                format!(
                    "https://dcos-mirror.azureedge.net/dcos/{dashed}/\
                     dcos_generate_config.sh"
                ),
            );
            assert!(entry
                .windows_installer_url
                .ends_with("dcos_generate_config.windows.tar.xz"));
        }
    }

    #[test]
    #[should_panic(expected = "is not in the catalog")]
    fn from_entries_rejects_unknown_default() {
        static ENTRIES: &[CatalogEntry] = &[CatalogEntry {
            version: "2.0.0",
            linux_installer_url: "",
            windows_installer_url: "",
            assets: AssetFamily::Dcos1_11,
        }];
        VersionCatalog::from_entries(ENTRIES, "2.0.1");
    }
}
