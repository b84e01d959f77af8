use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use fetchwise::config::{ConfigLoader, ResolvedConfig, expand_home};
use fetchwise::domain::Extension;
use fetchwise::engine::{DownloadEngine, DownloadRequest, DownloadResult, FailureKind};
use fetchwise::error::FetchwiseError;
use fetchwise::fetch::HttpFetcher;
use fetchwise::filename::FilenameBuilder;
use fetchwise::output::{HumanOutput, JsonOutput, OutputMode, StderrProgress};
use fetchwise::store::{DirectoryStore, DownloadStore};
use fetchwise::tool::DownloadAgent;

#[derive(Parser)]
#[command(name = "fetchwise")]
#[command(about = "Download URLs into correctly named, correctly typed local files")]
#[command(version, author)]
struct Cli {
    /// Path to a JSON config file (default: ./fetchwise.json if present)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Print machine-readable JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download one URL")]
    Get(GetArgs),
    #[command(about = "Download several URLs in order")]
    Batch(BatchArgs),
    #[command(about = "List files in the download directory")]
    List(ListArgs),
    #[command(about = "Show the tool definitions exposed to chat agents")]
    Tools,
    #[command(about = "Invoke a tool with JSON arguments")]
    Call(CallArgs),
}

#[derive(Args)]
struct GetArgs {
    url: String,

    /// Title or description used to name the file
    #[arg(long)]
    context: Option<String>,

    /// Force the extension instead of detecting it
    #[arg(long = "ext")]
    extension: Option<String>,

    #[arg(long)]
    dir: Option<String>,

    /// Timeout in seconds for each request
    #[arg(long)]
    timeout: Option<u64>,
}

#[derive(Args)]
struct BatchArgs {
    #[arg(required = true)]
    urls: Vec<String>,

    /// One per URL, in the same order
    #[arg(long = "context")]
    contexts: Vec<String>,

    #[arg(long)]
    dir: Option<String>,
}

#[derive(Args)]
struct ListArgs {
    /// Glob pattern, e.g. "*.pdf"
    pattern: Option<String>,

    #[arg(long)]
    dir: Option<String>,
}

#[derive(Args)]
struct CallArgs {
    name: String,

    /// Tool arguments as a JSON object
    #[arg(default_value = "{}")]
    arguments: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<FetchwiseError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &FetchwiseError) -> u8 {
    match error {
        FetchwiseError::InvalidUrl(_)
        | FetchwiseError::InvalidExtension(_)
        | FetchwiseError::InvalidPattern(_)
        | FetchwiseError::DirectoryNotFound(_)
        | FetchwiseError::ConfigRead(_)
        | FetchwiseError::ConfigParse(_)
        | FetchwiseError::UnknownTool(_)
        | FetchwiseError::InvalidToolArguments(_) => 2,
        FetchwiseError::Unreachable { .. }
        | FetchwiseError::HttpStatus { .. }
        | FetchwiseError::HttpClient(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Get(args) => run_get(args, &config, output_mode),
        Commands::Batch(args) => run_batch(args, &config, output_mode),
        Commands::List(args) => run_list(args, &config, output_mode),
        Commands::Tools => run_tools(&config, output_mode),
        Commands::Call(args) => run_call(args, &config, output_mode),
    }
}

fn build_engine(
    config: &ResolvedConfig,
) -> Result<DownloadEngine<HttpFetcher, DirectoryStore>, FetchwiseError> {
    let fetcher = HttpFetcher::with_user_agent(&config.user_agent)?;
    Ok(DownloadEngine::new(fetcher, DirectoryStore::new(config.download_dir.clone()))
        .with_router(config.router())
        .with_filename_builder(FilenameBuilder::new(config.max_stem_len))
        .with_timeout(config.timeout)
        .with_max_landing_page_bytes(config.max_landing_page_bytes))
}

fn store_for(dir: Option<&str>, config: &ResolvedConfig) -> DirectoryStore {
    match dir {
        Some(dir) => DirectoryStore::new(expand_home(dir)),
        None => DirectoryStore::new(config.download_dir.clone()),
    }
}

fn run_get(args: GetArgs, config: &ResolvedConfig, output_mode: OutputMode) -> miette::Result<()> {
    let engine = build_engine(config)?;
    let mut request = DownloadRequest::new(args.url);
    if let Some(context) = args.context {
        request = request.with_context(context);
    }
    if let Some(extension) = args.extension {
        request = request.with_explicit_extension(extension.parse::<Extension>()?);
    }
    if let Some(secs) = args.timeout {
        request = request.with_timeout(Duration::from_secs(secs.max(1)));
    }
    let store = store_for(args.dir.as_deref(), config);

    let result = match output_mode {
        OutputMode::Json => {
            let result = engine.download_into_with_progress(request, &store, &JsonOutput);
            JsonOutput::print_download(&result).into_diagnostic()?;
            result
        }
        OutputMode::Human => {
            let result = engine.download_into_with_progress(request, &store, &StderrProgress);
            HumanOutput::print_download(&result);
            result
        }
    };
    failure_to_error(&result)
}

fn failure_to_error(result: &DownloadResult) -> miette::Result<()> {
    let Some(failure) = &result.error else {
        return Ok(());
    };
    let error = match failure.kind {
        FailureKind::UnreachableResource => FetchwiseError::Unreachable {
            url: result.url.clone(),
            reason: failure.message.clone(),
        },
        FailureKind::StorageFailure => FetchwiseError::Storage(failure.message.clone()),
    };
    Err(error.into())
}

fn run_batch(
    args: BatchArgs,
    config: &ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    if !args.contexts.is_empty() && args.contexts.len() != args.urls.len() {
        return Err(FetchwiseError::InvalidToolArguments(format!(
            "got {} --context values for {} URLs",
            args.contexts.len(),
            args.urls.len()
        ))
        .into());
    }
    let engine = build_engine(config)?;
    let store = store_for(args.dir.as_deref(), config);

    let mut contexts = args.contexts.into_iter();
    let requests: Vec<DownloadRequest> = args
        .urls
        .into_iter()
        .map(|url| {
            let request = DownloadRequest::new(url);
            match contexts.next() {
                Some(context) => request.with_context(context),
                None => request,
            }
        })
        .collect();

    let batch = match output_mode {
        OutputMode::Json => {
            let batch = engine.download_multiple_into(requests, &store, &JsonOutput);
            JsonOutput::print_batch(&batch).into_diagnostic()?;
            batch
        }
        OutputMode::Human => {
            let batch = engine.download_multiple_into(requests, &store, &StderrProgress);
            HumanOutput::print_batch(&batch);
            batch
        }
    };

    if batch.failed.is_empty() {
        Ok(())
    } else {
        Err(miette::Report::msg(batch.summary()))
    }
}

fn run_list(
    args: ListArgs,
    config: &ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let store = store_for(args.dir.as_deref(), config);
    let entries = store.list(args.pattern.as_deref())?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_list(&entries).into_diagnostic()?,
        OutputMode::Human => {
            println!("{}", store.root());
            HumanOutput::print_list(&entries);
        }
    }
    Ok(())
}

fn run_tools(config: &ResolvedConfig, output_mode: OutputMode) -> miette::Result<()> {
    let agent = DownloadAgent::new(build_engine(config)?);
    let metadata = agent.metadata();
    let tools = agent.tools();
    match output_mode {
        OutputMode::Json => JsonOutput::print_tools(&metadata, &tools).into_diagnostic()?,
        OutputMode::Human => HumanOutput::print_tools(&metadata, &tools),
    }
    Ok(())
}

fn run_call(
    args: CallArgs,
    config: &ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let arguments: serde_json::Value = serde_json::from_str(&args.arguments)
        .map_err(|err| FetchwiseError::InvalidToolArguments(err.to_string()))?;
    let agent = DownloadAgent::new(build_engine(config)?);
    let response = agent.execute_tool(&args.name, &arguments);
    match output_mode {
        OutputMode::Json => JsonOutput::print_tool_response(&response).into_diagnostic()?,
        OutputMode::Human => HumanOutput::print_tool_response(&response),
    }
    if response.success {
        Ok(())
    } else {
        Err(miette::Report::msg(
            response.message.unwrap_or_else(|| format!("{} failed", args.name)),
        ))
    }
}
