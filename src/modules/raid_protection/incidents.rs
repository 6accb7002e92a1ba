use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockWriteGuard};

use crate::Error;

/// What a stored incident records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncidentType {
    MassJoin,
    SpamFlood,
    MassMention,
    SuspiciousLink,
    LockdownInitiated,
    LockdownLifted,
    RaidAlertApproved,
    RaidAlertDismissed,
    RaidActionExecuted,
}

impl std::fmt::Display for IncidentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IncidentType::MassJoin => "Mass Join",
            IncidentType::SpamFlood => "Spam Flood",
            IncidentType::MassMention => "Mass Mentions / Everyone Spam",
            IncidentType::SuspiciousLink => "Suspicious or Scam Link",
            IncidentType::LockdownInitiated => "Lockdown Initiated",
            IncidentType::LockdownLifted => "Lockdown Lifted",
            IncidentType::RaidAlertApproved => "Raid Alert Approved",
            IncidentType::RaidAlertDismissed => "Raid Alert Dismissed",
            IncidentType::RaidActionExecuted => "Raid Action Executed",
        };
        write!(f, "{}", s)
    }
}

/// Closed status set. Operator input is parsed through this enum, so
/// arbitrary status strings can never enter the store.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    poise::ChoiceParameter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IncidentStatus {
    #[name = "active"]
    Active,
    #[name = "under_review"]
    UnderReview,
    #[name = "resolved"]
    Resolved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlaggedUser {
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub guild_id: String,
    pub guild_name: String,
    #[serde(rename = "type")]
    pub kind: IncidentType,
    pub detected_by: String,
    pub users_flagged: Vec<FlaggedUser>,
    pub count: u64,
    pub status: IncidentStatus,
}

/// Fields the caller supplies; id/timestamp/status are assigned on append
#[derive(Debug, Clone)]
pub struct NewIncident {
    pub guild_id: String,
    pub guild_name: String,
    pub kind: IncidentType,
    pub detected_by: String,
    pub users_flagged: Vec<FlaggedUser>,
    pub count: u64,
}

/// Append-only incident log with in-place status mutation, persisted as a
/// JSON array on disk. The in-memory copy is authoritative for reads; a
/// failed durable write is reported to the caller but never aborts the
/// triggering workflow.
pub struct IncidentStore {
    path: PathBuf,
    incidents: RwLock<Vec<Incident>>,
}

impl IncidentStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }

        let incidents = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&raw)
                    .map_err(|e| format!("Corrupt incident log at {}: {}", path.display(), e))?
            }
        } else {
            std::fs::write(&path, "[]")?;
            Vec::new()
        };

        Ok(Self {
            path,
            incidents: RwLock::new(incidents),
        })
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, Vec<Incident>> {
        match self.incidents.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Appends a new incident with `status = active`. The stored record is
    /// always returned; the second element carries any persistence failure
    /// so the caller can surface it to the operational log channel.
    pub fn append(&self, new: NewIncident) -> (Incident, Result<(), Error>) {
        let mut guard = self.write_guard();

        // Millisecond-timestamp ids, bumped to stay strictly monotonic when
        // two incidents land in the same millisecond.
        let mut id = Utc::now().timestamp_millis();
        if let Some(last) = guard.last() {
            if last.id >= id {
                id = last.id + 1;
            }
        }

        let incident = Incident {
            id,
            timestamp: Utc::now(),
            guild_id: new.guild_id,
            guild_name: new.guild_name,
            kind: new.kind,
            detected_by: new.detected_by,
            users_flagged: new.users_flagged,
            count: new.count,
            status: IncidentStatus::Active,
        };

        guard.push(incident.clone());
        let persisted = self.persist(&guard);
        drop(guard);

        if let Err(ref e) = persisted {
            log::error!("Failed to persist incident {}: {}", incident.id, e);
        }

        (incident, persisted)
    }

    /// Most recent incidents first. `None` returns everything.
    pub fn list(&self, limit: Option<usize>) -> Vec<Incident> {
        let guard = match self.incidents.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        guard
            .iter()
            .rev()
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    pub fn get(&self, id: i64) -> Option<Incident> {
        let guard = match self.incidents.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        guard.iter().find(|i| i.id == id).cloned()
    }

    /// Returns `Ok(false)` when no incident has the given id; the store is
    /// left untouched in that case.
    pub fn update_status(&self, id: i64, status: IncidentStatus) -> Result<bool, Error> {
        let mut guard = self.write_guard();

        let Some(incident) = guard.iter_mut().find(|i| i.id == id) else {
            return Ok(false);
        };

        if incident.status == status {
            return Ok(true);
        }

        incident.status = status;
        self.persist(&guard)?;

        Ok(true)
    }

    fn persist(&self, incidents: &[Incident]) -> Result<(), Error> {
        let bytes = serde_json::to_vec_pretty(incidents)?;
        std::fs::write(&self.path, bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static STORE_COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn temp_store() -> IncidentStore {
        let path = std::env::temp_dir().join(format!(
            "raidguard-incidents-{}-{}.json",
            std::process::id(),
            STORE_COUNTER.fetch_add(1, Ordering::SeqCst),
        ));
        let _ = std::fs::remove_file(&path);
        IncidentStore::open(path).unwrap()
    }

    fn mass_join(count: u64) -> NewIncident {
        NewIncident {
            guild_id: "1000".to_string(),
            guild_name: "Test Guild".to_string(),
            kind: IncidentType::MassJoin,
            detected_by: "Automated System".to_string(),
            users_flagged: Vec::new(),
            count,
        }
    }

    #[test]
    fn append_then_list_one_returns_active_incident() {
        let store = temp_store();

        let (incident, persisted) = store.append(mass_join(6));
        assert!(persisted.is_ok());

        let listed = store.list(Some(1));
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, incident.id);
        assert_eq!(listed[0].status, IncidentStatus::Active);
        assert_eq!(listed[0].kind, IncidentType::MassJoin);
        assert_eq!(listed[0].count, 6);
    }

    #[test]
    fn list_is_most_recent_first() {
        let store = temp_store();

        let (first, _) = store.append(mass_join(1));
        let (second, _) = store.append(mass_join(2));

        assert!(second.id > first.id);

        let listed = store.list(None);
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);
    }

    #[test]
    fn update_status_on_unknown_id_is_false_and_leaves_store_unchanged() {
        let store = temp_store();
        let (incident, _) = store.append(mass_join(3));

        assert!(!store.update_status(incident.id + 999, IncidentStatus::Resolved).unwrap());
        assert_eq!(store.get(incident.id).unwrap().status, IncidentStatus::Active);
    }

    #[test]
    fn update_status_is_idempotent() {
        let store = temp_store();
        let (incident, _) = store.append(mass_join(3));

        assert!(store.update_status(incident.id, IncidentStatus::Resolved).unwrap());
        assert!(store.update_status(incident.id, IncidentStatus::Resolved).unwrap());
        assert_eq!(store.get(incident.id).unwrap().status, IncidentStatus::Resolved);
    }

    #[test]
    fn incidents_survive_reopen() {
        let store = temp_store();
        let (incident, _) = store.append(mass_join(4));
        let path = store.path.clone();
        drop(store);

        let reopened = IncidentStore::open(path).unwrap();
        let listed = reopened.list(None);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, incident.id);
    }

    #[test]
    fn status_tokens_outside_the_closed_set_are_rejected() {
        assert!("resolved".parse::<IncidentStatus>().is_ok());
        assert!("under_review".parse::<IncidentStatus>().is_ok());
        assert!("banana".parse::<IncidentStatus>().is_err());
        assert!("".parse::<IncidentStatus>().is_err());
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let store = temp_store();
        let (incident, _) = store.append(NewIncident {
            users_flagged: vec![FlaggedUser {
                id: "42".to_string(),
                display_name: "intruder#0001".to_string(),
            }],
            count: 1,
            ..mass_join(0)
        });

        let json = serde_json::to_value(&incident).unwrap();
        assert_eq!(json["guildId"], "1000");
        assert_eq!(json["detectedBy"], "Automated System");
        assert_eq!(json["usersFlagged"][0]["displayName"], "intruder#0001");
        assert_eq!(json["type"], "MassJoin");
        assert_eq!(json["status"], "active");
    }
}
