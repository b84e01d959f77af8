use std::io::{self, Write};

use serde::Serialize;

use crate::engine::{BatchResult, DownloadResult, ProgressEvent, ProgressSink};
use crate::store::DownloadEntry;
use crate::tool::{AgentMetadata, ToolDefinition, ToolResponse};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Human,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_download(result: &DownloadResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_batch(result: &BatchResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_list(entries: &[DownloadEntry]) -> io::Result<()> {
        Self::print_json(&entries)
    }

    pub fn print_tools(metadata: &AgentMetadata, tools: &[ToolDefinition]) -> io::Result<()> {
        #[derive(Serialize)]
        struct Catalog<'a> {
            agent: &'a AgentMetadata,
            tools: &'a [ToolDefinition],
        }
        Self::print_json(&Catalog {
            agent: metadata,
            tools,
        })
    }

    pub fn print_tool_response(response: &ToolResponse) -> io::Result<()> {
        Self::print_json(response)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Progress lines on stderr, so stdout stays clean for results.
pub struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn event(&self, event: ProgressEvent) {
        let elapsed = event
            .elapsed
            .map(|elapsed| format!("{:>6.2}s ", elapsed.as_secs_f64()))
            .unwrap_or_default();
        eprintln!("{elapsed}{}", event.message);
    }
}

pub struct HumanOutput;

impl HumanOutput {
    pub fn print_download(result: &DownloadResult) {
        match (&result.path, &result.error) {
            (Some(path), _) if result.success => {
                let how = result
                    .extension_source
                    .as_ref()
                    .map(|source| format!(" ({source:?})"))
                    .unwrap_or_default();
                println!("saved {path}{how}");
                if result.followed_landing_page() {
                    if let Some(target) = result.chain.last() {
                        println!("  via landing page -> {}", target.url());
                    }
                }
            }
            (_, Some(failure)) => println!("failed {}: {}", result.url, failure.message),
            _ => println!("failed {}", result.url),
        }
        for warning in &result.warnings {
            println!("  warning: {}", warning.message);
        }
    }

    pub fn print_batch(batch: &BatchResult) {
        for result in &batch.results {
            Self::print_download(result);
        }
        println!("{}", batch.summary());
    }

    pub fn print_list(entries: &[DownloadEntry]) {
        for entry in entries {
            println!("{:>10}  {}", entry.size_formatted, entry.path);
        }
        println!("{} files", entries.len());
    }

    pub fn print_tools(metadata: &AgentMetadata, tools: &[ToolDefinition]) {
        println!("{} {}: {}", metadata.name, metadata.version, metadata.description);
        for tool in tools {
            println!("  {:<18} {}", tool.name, tool.description);
        }
    }

    pub fn print_tool_response(response: &ToolResponse) {
        let status = if response.success { "ok" } else { "error" };
        match &response.message {
            Some(message) => println!("{status}: {message}"),
            None => println!("{status}"),
        }
        for warning in &response.warnings {
            println!("  warning: {warning}");
        }
    }
}
