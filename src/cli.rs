//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use linkgrab_core::{LinkType, MimeRegistry, PipelineConfig};

/// Download the files linked from a web page.
///
/// Linkgrab fetches one page, collects its anchor and/or image links, keeps
/// the ones whose MIME type passes the filter and downloads them concurrently.
#[derive(Parser, Debug)]
#[command(name = "linkgrab")]
#[command(author, version, about)]
pub struct Args {
    /// Page whose links are downloaded (may come from --config instead)
    pub url: Option<String>,

    /// Directory to save files into [default: .]
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Concurrent probes and downloads (1-100) [default: 2 x CPU cores]
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub threads: Option<u8>,

    /// Links to follow: anchor, image or both [default: both]
    #[arg(long, value_name = "TYPE")]
    pub links: Option<LinkType>,

    /// File type preset to keep: wildcard, images, texts or audio (repeatable)
    #[arg(long = "filter", value_name = "PRESET", value_parser = parse_filter)]
    pub filters: Vec<MimeRegistry>,

    /// JSON config file; command-line flags override its values
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Timeout in seconds for fetching the page (1-3600) [default: 30]
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub timeout: Option<u64>,

    /// Only list the files that would be downloaded
    #[arg(long)]
    pub dry_run: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

fn parse_filter(value: &str) -> Result<MimeRegistry, String> {
    MimeRegistry::preset_named(value).ok_or_else(|| {
        format!("unknown filter preset '{value}' (expected wildcard, images, texts or audio)")
    })
}

impl Args {
    /// Builds the pipeline config: config file (if any), then command-line
    /// overrides. The result is not yet validated.
    pub fn to_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)
                .with_context(|| format!("loading config file {}", path.display()))?,
            None => PipelineConfig::default(),
        };

        if let Some(url) = &self.url {
            config.page_url.clone_from(url);
        }
        if let Some(output_dir) = &self.output_dir {
            config.output_dir.clone_from(output_dir);
        }
        if let Some(threads) = self.threads {
            config.threads = usize::from(threads);
        }
        if let Some(links) = self.links {
            config.link_type = links;
        }
        if let Some(timeout) = self.timeout {
            config.crawl_timeout_secs = timeout;
        }
        if !self.filters.is_empty() {
            config.filter = merge_filters(&self.filters);
        }
        Ok(config)
    }
}

fn merge_filters(filters: &[MimeRegistry]) -> MimeRegistry {
    let name = filters
        .iter()
        .map(MimeRegistry::name)
        .collect::<Vec<_>>()
        .join(" + ");
    let mut merged = MimeRegistry::new(name);
    for filter in filters {
        merged.extend(filter);
    }
    merged
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    #[test]
    fn test_cli_default_args_parses_successfully() {
        let args = Args::try_parse_from(["linkgrab", "https://example.com"]).unwrap();
        assert_eq!(args.url.as_deref(), Some("https://example.com"));
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert!(!args.dry_run);
        assert!(args.threads.is_none());
        assert!(args.filters.is_empty());
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["linkgrab", "-v"]).unwrap();
        assert_eq!(args.verbose, 1);

        let args = Args::try_parse_from(["linkgrab", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_quiet_flag_sets_quiet() {
        let args = Args::try_parse_from(["linkgrab", "--quiet"]).unwrap();
        assert!(args.quiet);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["linkgrab", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_threads_range() {
        let args = Args::try_parse_from(["linkgrab", "-c", "100"]).unwrap();
        assert_eq!(args.threads, Some(100));

        let err = Args::try_parse_from(["linkgrab", "-c", "0"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);

        let err = Args::try_parse_from(["linkgrab", "--threads", "101"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_links_parses_link_type() {
        let args = Args::try_parse_from(["linkgrab", "--links", "image"]).unwrap();
        assert_eq!(args.links, Some(LinkType::Image));

        let err = Args::try_parse_from(["linkgrab", "--links", "video"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_filters_are_merged() {
        let args = Args::try_parse_from([
            "linkgrab",
            "https://example.com",
            "--filter",
            "images",
            "--filter",
            "audio",
        ])
        .unwrap();
        let config = args.to_config().unwrap();
        assert!(config.filter.has_mime("image/png"));
        assert!(config.filter.has_mime("audio/mpeg"));
        assert!(!config.filter.has_mime("text/html"));

        let err = Args::try_parse_from(["linkgrab", "--filter", "videos"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_overrides_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("linkgrab.json");
        std::fs::write(
            &path,
            r#"{ "page_url": "https://example.com/a", "threads": 3, "link_type": "anchor" }"#,
        )
        .unwrap();

        let args = Args::try_parse_from([
            "linkgrab",
            "--config",
            path.to_str().unwrap(),
            "-c",
            "7",
            "--timeout",
            "5",
        ])
        .unwrap();
        let config = args.to_config().unwrap();
        assert_eq!(config.page_url, "https://example.com/a");
        assert_eq!(config.threads, 7);
        assert_eq!(config.link_type, LinkType::Anchor);
        assert_eq!(config.crawl_timeout_secs, 5);
    }

    #[test]
    fn test_cli_missing_config_file_is_an_error() {
        let args = Args::try_parse_from(["linkgrab", "--config", "/nonexistent/linkgrab.json"])
            .unwrap();
        let err = args.to_config().unwrap_err();
        assert!(format!("{err:#}").contains("loading config file"));
    }
}
