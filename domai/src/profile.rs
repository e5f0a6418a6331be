//! User profiles and their persistence
//!
//! A profile picks the default explanation tier and the crisis threshold for
//! a session. Progress tracking is stored but only read here (completed
//! topics are excluded from learning suggestions).

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use domai_common::{Severity, Tier};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::domain::ProfileError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    pub id: String,
    /// Default explanation tier
    pub expertise: Tier,
    pub preferences: Preferences,
    pub progress: LearningProgress,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            expertise: Tier::Novice,
            preferences: Preferences::default(),
            progress: LearningProgress::default(),
        }
    }
}

impl UserProfile {
    #[must_use]
    pub fn new(id: impl Into<String>, expertise: Tier) -> Self {
        Self { id: id.into(), expertise, ..Self::default() }
    }

    /// Set the technical-depth scalar, clamped to `0.0..=1.0`
    pub fn set_technical_depth(&mut self, depth: f32) {
        self.preferences.technical_depth = if depth.is_nan() { 0.0 } else { depth.clamp(0.0, 1.0) };
    }

    pub fn complete_topic(&mut self, topic: &str) {
        self.progress.completed_topics.insert(topic.to_string());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// 0.0 = plain language only, 1.0 = full technical detail
    pub technical_depth: f32,
    /// Lowest severity surfaced on the crisis stream for this user
    pub notification_threshold: Severity,
    pub privacy: PrivacyFlags,
}

impl Default for Preferences {
    fn default() -> Self {
        Self { technical_depth: 0.3, notification_threshold: Severity::High, privacy: PrivacyFlags::default() }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacyFlags {
    /// Mask IP addresses in rendered explanations (raw tier excepted)
    pub redact_addresses: bool,
    pub share_telemetry: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningProgress {
    pub completed_topics: BTreeSet<String>,
    /// Per-skill score in `0.0..=1.0`
    pub proficiency: BTreeMap<String, f32>,
    pub achievements: Vec<String>,
    pub last_assessment: Option<DateTime<Utc>>,
}

/// Load/save collaborator for profiles
pub trait ProfileStore: Send + Sync {
    /// `Ok(None)` when no profile with this id exists
    ///
    /// # Errors
    /// I/O or JSON failures, or an id unusable as a key.
    fn load(&self, id: &str) -> Result<Option<UserProfile>, ProfileError>;

    /// # Errors
    /// I/O or JSON failures, or an id unusable as a key.
    fn save(&self, profile: &UserProfile) -> Result<(), ProfileError>;
}

/// One `<id>.json` file per profile in a directory
#[derive(Debug, Clone)]
pub struct JsonProfileStore {
    dir: PathBuf,
}

impl JsonProfileStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, ProfileError> {
        let valid = !id.is_empty()
            && id.len() <= 64
            && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(ProfileError::InvalidId(id.to_string()));
        }
        Ok(self.dir.join(format!("{id}.json")))
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ProfileStore for JsonProfileStore {
    fn load(&self, id: &str) -> Result<Option<UserProfile>, ProfileError> {
        let path = self.path_for(id)?;
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut profile: UserProfile = serde_json::from_str(&content)?;
        profile.id = id.to_string();
        let depth = profile.preferences.technical_depth;
        profile.set_technical_depth(depth);
        debug!("Loaded profile {id} from {}", path.display());
        Ok(Some(profile))
    }

    fn save(&self, profile: &UserProfile) -> Result<(), ProfileError> {
        let path = self.path_for(&profile.id)?;
        fs::create_dir_all(&self.dir)?;
        // Write-then-rename so a crash never leaves a truncated profile
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(profile)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}
