use super::incidents::IncidentType;

/// Case-insensitive substrings that mark a message as a likely scam or
/// unsolicited invite.
const SUSPICIOUS_PATTERNS: [&str; 6] = ["discord.gg/", "nitro", "free", "gift", "steam", "giveaway"];

pub fn contains_suspicious_pattern(content: &str) -> bool {
    let lowered = content.to_lowercase();
    SUSPICIOUS_PATTERNS.iter().any(|p| lowered.contains(p))
}

/// Stateless single-message classifier. At most one reason is reported even
/// when several conditions hold; precedence is
/// `SpamFlood > MassMention > SuspiciousLink`.
pub fn classify_message(
    content: &str,
    mention_count: usize,
    mentions_everyone: bool,
    spam_flood: bool,
    mention_limit: usize,
) -> Option<IncidentType> {
    if spam_flood {
        return Some(IncidentType::SpamFlood);
    }

    if mentions_everyone || mention_count >= mention_limit {
        return Some(IncidentType::MassMention);
    }

    if contains_suspicious_pattern(content) {
        return Some(IncidentType::SuspiciousLink);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_message_is_not_flagged() {
        assert_eq!(classify_message("hello there", 0, false, false, 5), None);
    }

    #[test]
    fn suspicious_patterns_match_case_insensitively() {
        assert!(contains_suspicious_pattern("claim your FREE NITRO at discord.gg/xyz"));
        assert!(contains_suspicious_pattern("Steam GiveAway!!"));
        assert!(!contains_suspicious_pattern("let's play a game tonight"));
    }

    #[test]
    fn mass_mention_takes_precedence_over_suspicious_link() {
        // @everyone plus scam-looking text must still report MassMention.
        let got = classify_message("free nitro for @everyone discord.gg/scam", 0, true, false, 5);
        assert_eq!(got, Some(IncidentType::MassMention));
    }

    #[test]
    fn spam_flood_takes_precedence_over_everything() {
        let got = classify_message("free nitro @everyone", 9, true, true, 5);
        assert_eq!(got, Some(IncidentType::SpamFlood));
    }

    #[test]
    fn mention_count_at_limit_is_mass_mention() {
        assert_eq!(classify_message("hi", 5, false, false, 5), Some(IncidentType::MassMention));
        assert_eq!(classify_message("hi", 4, false, false, 5), None);
    }

    #[test]
    fn suspicious_link_reported_when_nothing_else_matches() {
        let got = classify_message("join discord.gg/abc for prizes", 0, false, false, 5);
        assert_eq!(got, Some(IncidentType::SuspiciousLink));
    }
}
