use serde::{Deserialize, Serialize};

/// Client tags recognized by the fingerprinter (§4.2), in table order —
/// earlier entries win ties on a user-agent that happens to match more
/// than one substring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientType {
    ClaudeCode,
    GeminiCli,
    Codex,
    CherryStudio,
    DroidCli,
    Cursor,
    Windsurf,
    Unknown,
}

impl ClientType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientType::ClaudeCode => "ClaudeCode",
            ClientType::GeminiCli => "Gemini-CLI",
            ClientType::Codex => "Codex",
            ClientType::CherryStudio => "CherryStudio",
            ClientType::DroidCli => "Droid-CLI",
            ClientType::Cursor => "Cursor",
            ClientType::Windsurf => "Windsurf",
            ClientType::Unknown => "Unknown",
        }
    }
}

/// Ordered (substring, tag) table. Matching is a lower-cased substring scan;
/// the first matching entry wins.
const TABLE: &[(&str, ClientType)] = &[
    ("claude-code", ClientType::ClaudeCode),
    ("claude_code", ClientType::ClaudeCode),
    ("gemini-cli", ClientType::GeminiCli),
    ("codex", ClientType::Codex),
    ("cherrystudio", ClientType::CherryStudio),
    ("droid-cli", ClientType::DroidCli),
    ("cursor", ClientType::Cursor),
    ("windsurf", ClientType::Windsurf),
];

/// Map a raw `User-Agent` header value to a known client tag.
pub fn fingerprint(user_agent: &str) -> ClientType {
    let lowered = user_agent.to_lowercase();
    for (needle, tag) in TABLE {
        if lowered.contains(needle) {
            return *tag;
        }
    }
    ClientType::Unknown
}

/// `allowed_clients` matching (§4.3): `*`/`all` wildcards the whole list,
/// otherwise each entry may end in a single trailing `*` for a prefix match.
/// Always case-insensitive.
pub fn client_allowed(allowed: &[String], client: ClientType) -> bool {
    if allowed.is_empty() {
        return true;
    }
    let client_str = client.as_str().to_lowercase();
    allowed.iter().any(|pattern| {
        let pattern = pattern.to_lowercase();
        if pattern == "*" || pattern == "all" {
            return true;
        }
        match pattern.strip_suffix('*') {
            Some(prefix) => client_str.starts_with(prefix),
            None => client_str == pattern,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_claude_code() {
        assert_eq!(fingerprint("claude-code/1.0"), ClientType::ClaudeCode);
        assert_eq!(fingerprint("Claude-Code/2.1 (macOS)"), ClientType::ClaudeCode);
    }

    #[test]
    fn falls_back_to_unknown() {
        assert_eq!(fingerprint("curl/8.0"), ClientType::Unknown);
    }

    #[test]
    fn table_order_breaks_ties() {
        // "cursor" appears later than "codex" — a UA matching both substrings
        // (hypothetically) would resolve to the earlier table entry.
        assert_eq!(fingerprint("codex-cursor-hybrid/1.0"), ClientType::Codex);
    }

    #[test]
    fn allowed_clients_wildcard() {
        assert!(client_allowed(&["*".to_string()], ClientType::Cursor));
        assert!(client_allowed(&["all".to_string()], ClientType::Unknown));
        assert!(client_allowed(&[], ClientType::Unknown));
    }

    #[test]
    fn allowed_clients_trailing_prefix() {
        let allowed = vec!["Claude*".to_string()];
        assert!(client_allowed(&allowed, ClientType::ClaudeCode));
        assert!(!client_allowed(&allowed, ClientType::Cursor));
    }

    #[test]
    fn allowed_clients_exact_case_insensitive() {
        let allowed = vec!["cursor".to_string()];
        assert!(client_allowed(&allowed, ClientType::Cursor));
        assert!(!client_allowed(&allowed, ClientType::Windsurf));
    }
}
