//! [`KeyRegistry`]: current key version, rotation history, and derivation rights.

use std::collections::BTreeMap;

use arc_swap::ArcSwap;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use vault_common::KeyVersion;

use crate::crypto::kdf::{self, DerivedKey, KdfError, MasterKey, SALT_LEN};

/// Errors produced by the key layer.
#[derive(Debug, Error)]
pub enum KeyError {
    /// The version was retired and its derivation rights dropped.
    #[error("key version {0} is no longer retained")]
    Retired(KeyVersion),

    /// The version has never been current.
    #[error("key version {requested} is newer than the current version {current}")]
    Unknown {
        requested: KeyVersion,
        current: KeyVersion,
    },

    /// The version counter cannot advance further.
    #[error("key version space exhausted")]
    Exhausted,

    #[error(transparent)]
    Derivation(#[from] KdfError),
}

/// When an envelope's key version is due for re-encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StalenessPolicy {
    /// Stale once the version has been superseded for longer than the window.
    MaxAge(Duration),
    /// Stale once the version trails the current one by more than `n`.
    MaxVersionLag(u32),
    /// Only retired or unusable versions are stale.
    Never,
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        StalenessPolicy::MaxAge(Duration::days(90))
    }
}

/// Rotation history of one retained version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub version: KeyVersion,
    /// When the version became current.
    pub introduced_at: DateTime<Utc>,
    /// When the next version replaced it; `None` for the current version.
    pub superseded_at: Option<DateTime<Utc>>,
}

/// Immutable snapshot swapped atomically on every rotation or retirement.
#[derive(Debug, Clone)]
struct KeyTable {
    current: KeyVersion,
    oldest_retained: KeyVersion,
    /// Introduction instants of the versions this registry has observed.
    /// Versions restored by [`KeyRegistry::resume`] share the resume instant.
    introduced: BTreeMap<KeyVersion, DateTime<Utc>>,
}

impl KeyTable {
    fn introduced_at(&self, version: KeyVersion) -> Option<DateTime<Utc>> {
        self.introduced
            .get(&version)
            .or_else(|| self.introduced.values().next())
            .copied()
    }

    fn superseded_at(&self, version: KeyVersion) -> Option<DateTime<Utc>> {
        let next = version.next()?;
        self.introduced.range(next..).next().map(|(_, at)| *at)
    }

    fn is_retained(&self, version: KeyVersion) -> bool {
        version >= self.oldest_retained && version <= self.current
    }
}

/// Shared registry of key versions.
///
/// Owns the master key. Readers load a lock-free snapshot; writers publish a
/// new snapshot with a compare-and-swap, so concurrent rotations each receive
/// a distinct version number.
#[derive(Debug)]
pub struct KeyRegistry {
    master: MasterKey,
    policy: StalenessPolicy,
    table: ArcSwap<KeyTable>,
}

impl KeyRegistry {
    /// Create a registry whose current version is [`KeyVersion::INITIAL`].
    pub fn new(master: MasterKey, policy: StalenessPolicy) -> Self {
        Self::resume_at(master, policy, KeyVersion::INITIAL, Utc::now())
    }

    /// Restore a registry whose current version was persisted by the host.
    ///
    /// Versions `1..=current` are retained. A `current` of 0 is treated as 1.
    pub fn resume(master: MasterKey, policy: StalenessPolicy, current: KeyVersion) -> Self {
        Self::resume_at(master, policy, current, Utc::now())
    }

    fn resume_at(
        master: MasterKey,
        policy: StalenessPolicy,
        current: KeyVersion,
        now: DateTime<Utc>,
    ) -> Self {
        let current = current.max(KeyVersion::INITIAL);
        let mut introduced = BTreeMap::new();
        introduced.insert(current, now);
        Self {
            master,
            policy,
            table: ArcSwap::from_pointee(KeyTable {
                current,
                oldest_retained: KeyVersion::INITIAL,
                introduced,
            }),
        }
    }

    /// The version used for new encryptions.
    pub fn current_version(&self) -> KeyVersion {
        self.table.load().current
    }

    /// Oldest version that can still be derived.
    pub fn oldest_retained(&self) -> KeyVersion {
        self.table.load().oldest_retained
    }

    /// The configured staleness policy.
    pub fn policy(&self) -> StalenessPolicy {
        self.policy
    }

    /// Advance the current version by one and return it.
    ///
    /// Older versions stay derivable.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Exhausted`] if the counter is at `u32::MAX`.
    pub fn rotate(&self) -> Result<KeyVersion, KeyError> {
        self.rotate_at(Utc::now())
    }

    /// [`rotate`](Self::rotate) with an explicit clock reading.
    pub fn rotate_at(&self, now: DateTime<Utc>) -> Result<KeyVersion, KeyError> {
        let previous = self.table.rcu(|table| {
            let mut next = KeyTable::clone(table);
            if let Some(version) = table.current.next() {
                next.current = version;
                next.introduced.insert(version, now);
            }
            next
        });
        previous.current.next().ok_or(KeyError::Exhausted)
    }

    /// Drop derivation rights for every version older than `version`.
    ///
    /// Retirement only moves forward; retiring below the current watermark is
    /// a no-op. Returns the oldest version still retained.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Unknown`] if `version` is newer than the current one.
    pub fn retire_before(&self, version: KeyVersion) -> Result<KeyVersion, KeyError> {
        let snapshot = self.table.load();
        if version > snapshot.current {
            return Err(KeyError::Unknown {
                requested: version,
                current: snapshot.current,
            });
        }
        let previous = self.table.rcu(|table| {
            let mut next = KeyTable::clone(table);
            next.oldest_retained = table.oldest_retained.max(version);
            next.introduced = next.introduced.split_off(&next.oldest_retained);
            next
        });
        Ok(previous.oldest_retained.max(version))
    }

    /// Rotation history for a retained version.
    pub fn version_info(&self, version: KeyVersion) -> Option<VersionInfo> {
        let table = self.table.load();
        if !table.is_retained(version) {
            return None;
        }
        Some(VersionInfo {
            version,
            introduced_at: table.introduced_at(version)?,
            superseded_at: table.superseded_at(version),
        })
    }

    /// Derive the key for `salt` under a specific retained version.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError`] if the version is zero, retired, or newer than
    /// the current version.
    pub fn derive_key(
        &self,
        salt: &[u8; SALT_LEN],
        version: KeyVersion,
    ) -> Result<DerivedKey, KeyError> {
        let table = self.table.load();
        if version.get() == 0 {
            return Err(KdfError::InvalidVersion(version).into());
        }
        if version > table.current {
            return Err(KeyError::Unknown {
                requested: version,
                current: table.current,
            });
        }
        if version < table.oldest_retained {
            return Err(KeyError::Retired(version));
        }
        Ok(kdf::derive(&self.master, salt, version)?)
    }

    /// Derive the key for `salt` under the current version.
    ///
    /// The returned version and key come from the same snapshot.
    pub fn derive_current(
        &self,
        salt: &[u8; SALT_LEN],
    ) -> Result<(KeyVersion, DerivedKey), KeyError> {
        let version = self.table.load().current;
        let key = kdf::derive(&self.master, salt, version)?;
        Ok((version, key))
    }

    /// Whether data sealed under `version` should be re-encrypted now.
    pub fn is_stale(&self, version: KeyVersion) -> bool {
        self.is_stale_at(version, Utc::now())
    }

    /// [`is_stale`](Self::is_stale) with an explicit clock reading.
    ///
    /// The current version is never stale. Versions the registry cannot
    /// derive (zero, retired, or newer than current) always are.
    pub fn is_stale_at(&self, version: KeyVersion, now: DateTime<Utc>) -> bool {
        let table = self.table.load();
        if version == table.current {
            return false;
        }
        if version.get() == 0 || !table.is_retained(version) {
            return true;
        }
        match self.policy {
            StalenessPolicy::Never => false,
            StalenessPolicy::MaxVersionLag(lag) => table.current.get() - version.get() > lag,
            StalenessPolicy::MaxAge(max_age) => match table.superseded_at(version) {
                Some(superseded) => now - superseded > max_age,
                None => false,
            },
        }
    }
}
