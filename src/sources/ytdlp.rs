use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{ExtractProfile, ExtractedInfo, Extractor};

/// [`Extractor`] backed by the yt-dlp executable.
///
/// yt-dlp blocks for the whole network round trip, so every call runs on the
/// blocking thread pool.
pub struct YtDlpExtractor {
    binary: String,
}

/// Información extraída de yt-dlp
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: Option<String>,
    url: Option<String>,
    webpage_url: Option<String>,
    entries: Option<Vec<Option<YtDlpInfo>>>,
}

impl YtDlpExtractor {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    async fn extract(&self, query: &str, profile: &ExtractProfile) -> Result<ExtractedInfo> {
        let args = build_args(query, profile);
        let binary = self.binary.clone();

        debug!("🔍 yt-dlp ({}): {}", profile.default_search, query);

        let output = tokio::task::spawn_blocking(move || {
            std::process::Command::new(&binary).args(&args).output()
        })
        .await
        .context("yt-dlp task join error")?
        .with_context(|| format!("Error al ejecutar {}", self.binary))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("{}", stderr.trim());
        }

        parse_output(&output.stdout)
    }
}

fn build_args(query: &str, profile: &ExtractProfile) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-J".into(),
        "--no-playlist".into(),
        "--no-warnings".into(),
        "--quiet".into(),
        "-f".into(),
        "bestaudio/best".into(),
        "--socket-timeout".into(),
        "30".into(),
        "--default-search".into(),
        profile.default_search.clone(),
    ];

    if !profile.player_clients.is_empty() {
        args.push("--extractor-args".into());
        args.push(format!("youtube:player_client={}", profile.player_clients.join(",")));
    }

    if let Some(cookies) = &profile.cookie_file {
        args.push("--cookies".into());
        args.push(cookies.display().to_string());
    }

    args.push("--".into());
    args.push(query.to_string());
    args
}

/// Reads yt-dlp's JSON dump; search results resolve to their first entry.
fn parse_output(stdout: &[u8]) -> Result<ExtractedInfo> {
    let mut info: YtDlpInfo =
        serde_json::from_slice(stdout).context("Error al parsear respuesta de yt-dlp")?;

    if let Some(entries) = info.entries.take() {
        info = entries
            .into_iter()
            .flatten()
            .next()
            .ok_or_else(|| anyhow::anyhow!("No results found."))?;
    }

    Ok(ExtractedInfo {
        title: info.title,
        stream_url: info.url,
        page_url: info.webpage_url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    #[test]
    fn primary_profile_passes_clients_and_cookies() {
        let profile = ExtractProfile::youtube(
            vec!["android".into(), "web".into()],
            Some(PathBuf::from("/tmp/cookies.txt")),
        );
        let args = build_args("-rickroll", &profile);

        assert!(args.windows(2).any(|w| w == ["--default-search", "ytsearch"]));
        assert!(args
            .windows(2)
            .any(|w| w == ["--extractor-args", "youtube:player_client=android,web"]));
        assert!(args.windows(2).any(|w| w == ["--cookies", "/tmp/cookies.txt"]));
        assert_eq!(&args[args.len() - 2..], ["--", "-rickroll"]);
    }

    #[test]
    fn secondary_profile_has_no_client_overrides() {
        let args = build_args("scsearch1:song", &ExtractProfile::soundcloud());
        assert!(!args.contains(&"--extractor-args".to_string()));
        assert!(!args.contains(&"--cookies".to_string()));
    }

    #[test]
    fn search_output_uses_first_non_null_entry() {
        let json = br#"{
            "_type": "playlist",
            "entries": [null, {"title": "Rick Astley - Never Gonna Give You Up",
                               "url": "https://rr1.example/audio",
                               "webpage_url": "https://www.youtube.com/watch?v=dQw4w9WgXcQ"}]
        }"#;

        assert_eq!(
            parse_output(json).unwrap(),
            ExtractedInfo {
                title: Some("Rick Astley - Never Gonna Give You Up".into()),
                stream_url: Some("https://rr1.example/audio".into()),
                page_url: Some("https://www.youtube.com/watch?v=dQw4w9WgXcQ".into()),
            }
        );
    }

    #[test]
    fn empty_search_is_an_error() {
        let err = parse_output(br#"{"entries": []}"#).unwrap_err();
        assert_eq!(err.to_string(), "No results found.");
    }

    #[test]
    fn single_video_output_is_read_directly() {
        let info = parse_output(br#"{"title": "t", "webpage_url": "https://youtu.be/x"}"#).unwrap();
        assert_eq!(info.title.as_deref(), Some("t"));
        assert_eq!(info.stream_url, None);
    }
}
