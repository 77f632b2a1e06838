use anyhow::{Context, Result};
use std::{path::PathBuf, time::Duration};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub guild_ids: Vec<u64>, // Registro de comandos por guild (vacío = global)

    // Spotify (opcional, solo se exige al usar un enlace)
    pub spotify_client_id: Option<String>,
    pub spotify_client_secret: Option<String>,

    // yt-dlp / ffmpeg
    pub ytdlp_path: String,
    pub ytdlp_cookie_file: Option<PathBuf>,
    pub ytdlp_player_clients: Vec<String>,
    pub ffmpeg_path: String,
    pub reconnect_delay_max: Duration,

    // Límites
    pub idle_timeout: Duration,
    pub max_catalog_tracks: usize,
    pub resolve_concurrency: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let guild_ids = match (get("DISCORD_GUILD_IDS"), get("DISCORD_GUILD_ID")) {
            (Some(raw), _) => {
                let (ids, invalid) = parse_guild_ids(&raw);
                if !invalid.is_empty() {
                    warn!("⚠️ Ignoring invalid DISCORD_GUILD_IDS entries: {}", invalid.join(", "));
                }
                ids
            }
            (None, Some(single)) => match single.parse::<u64>() {
                Ok(id) if id != 0 => vec![id],
                _ => {
                    warn!("⚠️ DISCORD_GUILD_ID is not a number, registering commands globally");
                    Vec::new()
                }
            },
            (None, None) => Vec::new(),
        };

        let config = Self {
            discord_token: get("DISCORD_TOKEN")
                .context("DISCORD_TOKEN is missing. Add it to your .env file.")?,
            guild_ids,

            spotify_client_id: get("SPOTIFY_CLIENT_ID"),
            spotify_client_secret: get("SPOTIFY_CLIENT_SECRET"),

            ytdlp_path: get("YTDLP_PATH").unwrap_or_else(|| "yt-dlp".to_string()),
            ytdlp_cookie_file: get("YTDLP_COOKIEFILE").map(PathBuf::from),
            ytdlp_player_clients: get("YTDLP_PLAYER_CLIENTS")
                .unwrap_or_else(|| "android,web,tv_embedded".to_string())
                .split(',')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect(),
            ffmpeg_path: get("FFMPEG_PATH").unwrap_or_else(|| "ffmpeg".to_string()),
            reconnect_delay_max: Duration::from_secs(
                get("RECONNECT_DELAY_MAX_SECS")
                    .unwrap_or_else(|| "5".to_string())
                    .parse()
                    .context("RECONNECT_DELAY_MAX_SECS must be a number of seconds")?,
            ),

            idle_timeout: Duration::from_secs(
                get("IDLE_TIMEOUT_SECS")
                    .unwrap_or_else(|| "3600".to_string()) // 1 hora
                    .parse()
                    .context("IDLE_TIMEOUT_SECS must be a number of seconds")?,
            ),
            max_catalog_tracks: get("MAX_CATALOG_TRACKS")
                .unwrap_or_else(|| "25".to_string())
                .parse()
                .context("MAX_CATALOG_TRACKS must be a number")?,
            resolve_concurrency: get("RESOLVE_CONCURRENCY")
                .unwrap_or_else(|| "3".to_string())
                .parse()
                .context("RESOLVE_CONCURRENCY must be a number")?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - The Discord token must be present
    /// - Idle window, catalog cap and resolve concurrency must be > 0
    /// - A configured cookie file should exist (only warned about)
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.is_empty() {
            anyhow::bail!("DISCORD_TOKEN is missing. Add it to your .env file.");
        }

        if self.idle_timeout.is_zero() {
            anyhow::bail!("Idle timeout must be greater than 0");
        }

        if self.max_catalog_tracks == 0 {
            anyhow::bail!("Max catalog tracks must be greater than 0");
        }

        if self.resolve_concurrency == 0 {
            anyhow::bail!("Resolve concurrency must be greater than 0");
        }

        if let Some(path) = &self.ytdlp_cookie_file {
            if !path.exists() {
                warn!("🍪 Cookie file {} does not exist, yt-dlp will run without it", path.display());
            }
        }

        Ok(())
    }

    /// Whether both Spotify credentials are present.
    pub fn has_spotify(&self) -> bool {
        self.spotify_client_id.is_some() && self.spotify_client_secret.is_some()
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Excludes the token and Spotify secret.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Commands: {}\n  \
            Spotify: {}\n  \
            yt-dlp: {} (clients: {}, cookies: {})\n  \
            Limits: idle {}, {} catalog tracks, {} parallel resolves",
            if self.guild_ids.is_empty() {
                "global".to_string()
            } else {
                format!("{} guild(s)", self.guild_ids.len())
            },
            if self.has_spotify() { "configured" } else { "disabled" },
            self.ytdlp_path,
            self.ytdlp_player_clients.join(","),
            self.ytdlp_cookie_file
                .as_ref()
                .map_or("none".to_string(), |p| p.display().to_string()),
            humantime::format_duration(self.idle_timeout),
            self.max_catalog_tracks,
            self.resolve_concurrency,
        )
    }
}

/// Splits a comma separated guild id list into valid ids and rejected entries.
pub fn parse_guild_ids(raw: &str) -> (Vec<u64>, Vec<String>) {
    let mut parsed = Vec::new();
    let mut invalid = Vec::new();

    for item in raw.split(',') {
        let value = item.trim();
        if value.is_empty() {
            continue;
        }
        match value.parse::<u64>() {
            Ok(id) if id != 0 => parsed.push(id),
            _ => invalid.push(value.to_string()),
        }
    }

    (parsed, invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_applied() {
        let config = Config::from_lookup(lookup(&[("DISCORD_TOKEN", "abc")])).unwrap();

        assert_eq!(config.idle_timeout, Duration::from_secs(3600));
        assert_eq!(config.max_catalog_tracks, 25);
        assert_eq!(config.ytdlp_player_clients, vec!["android", "web", "tv_embedded"]);
        assert!(config.guild_ids.is_empty());
        assert!(!config.has_spotify());
    }

    #[test]
    fn missing_token_is_an_error() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(err.to_string().contains("DISCORD_TOKEN"));
    }

    #[test]
    fn guild_id_list_skips_invalid_entries() {
        assert_eq!(
            parse_guild_ids("123, abc,,456 ,0"),
            (vec![123, 456], vec!["abc".to_string(), "0".to_string()])
        );

        let config = Config::from_lookup(lookup(&[
            ("DISCORD_TOKEN", "abc"),
            ("DISCORD_GUILD_IDS", "1,2"),
            ("DISCORD_GUILD_ID", "9"),
        ]))
        .unwrap();
        assert_eq!(config.guild_ids, vec![1, 2]);
    }

    #[test]
    fn single_guild_id_is_used_when_list_absent() {
        let config = Config::from_lookup(lookup(&[
            ("DISCORD_TOKEN", "abc"),
            ("DISCORD_GUILD_ID", "77"),
        ]))
        .unwrap();
        assert_eq!(config.guild_ids, vec![77]);
    }

    #[test]
    fn zero_idle_window_is_rejected() {
        let result = Config::from_lookup(lookup(&[
            ("DISCORD_TOKEN", "abc"),
            ("IDLE_TIMEOUT_SECS", "0"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn summary_hides_secrets() {
        let dir = tempfile::tempdir().unwrap();
        let cookies = dir.path().join("cookies.txt");
        std::fs::write(&cookies, "# Netscape HTTP Cookie File").unwrap();

        let config = Config::from_lookup(lookup(&[
            ("DISCORD_TOKEN", "super-secret-token"),
            ("SPOTIFY_CLIENT_ID", "id"),
            ("SPOTIFY_CLIENT_SECRET", "spotify-secret"),
            ("YTDLP_COOKIEFILE", cookies.to_str().unwrap()),
        ]))
        .unwrap();

        let summary = config.summary();
        assert!(!summary.contains("super-secret-token"));
        assert!(!summary.contains("spotify-secret"));
        assert!(summary.contains("Spotify: configured"));
        assert!(summary.contains("idle 1h"));
    }
}
