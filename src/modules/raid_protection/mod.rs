pub mod events; // Events is a public interface
pub mod detector;
pub mod incidents;
pub mod lockdown;

mod cache;
mod cmds;
mod heuristic;
mod responder;

pub fn module() -> crate::modules::Module {
    crate::modules::Module {
        id: "raid_protection",
        name: "Raid Protection",
        description: "Detects join/message bursts and scam content, posts actionable raid alerts and manages server lockdowns",
        commands: vec![
            cmds::raidreview(),
            cmds::lockdown(),
            cmds::unlock(),
            cmds::lockdownstatus(),
            cmds::raidaction(),
            cmds::raidconfig(),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::detector::BurstDetector;
    use super::incidents::{IncidentStatus, IncidentStore, IncidentType, NewIncident};
    use chrono::{Duration, TimeZone, Utc};
    use serenity::all::GuildId;

    // Detection feeding the store, the way the join listener wires them.
    #[test]
    fn join_burst_produces_one_active_mass_join_incident() {
        let path = std::env::temp_dir().join(format!(
            "raidguard-burst-{}.json",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        let detector = BurstDetector::default();
        let store = IncidentStore::open(&path).unwrap();

        let guild = GuildId::new(1000);
        let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let window = Duration::seconds(10);

        // Six joins inside three seconds.
        for i in 0..6 {
            let now = t0 + Duration::milliseconds(i * 500);

            if detector.record_join(guild, now, 5, window) {
                let count = detector.join_window_len(guild, now, window) as u64;
                store.append(NewIncident {
                    guild_id: guild.to_string(),
                    guild_name: "Test Guild".to_string(),
                    kind: IncidentType::MassJoin,
                    detected_by: "Automated System".to_string(),
                    users_flagged: Vec::new(),
                    count,
                });
            }
        }

        let incidents = store.list(None);
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].kind, IncidentType::MassJoin);
        assert_eq!(incidents[0].status, IncidentStatus::Active);
        assert_eq!(incidents[0].count, 5);

        let _ = std::fs::remove_file(&path);
    }
}
